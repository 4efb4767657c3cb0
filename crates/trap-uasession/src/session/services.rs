// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Typed service calls on a [`Session`].
//!
//! Every call here is application traffic: it goes through
//! [`Session::perform_transaction`] and is queued while the session is
//! reconnecting. Batched services verify that result arrays line up with
//! their request arrays.

use std::time::Duration;

use crate::config::SubscriptionSettings;
use crate::error::{UaError, UaResult};
use crate::messages::{
    ensure_aligned, BrowseDescription, BrowseRequest, BrowseResult, CallMethodRequest,
    CallMethodResult, CallRequest, CreateMonitoredItemsRequest, CreateMonitoredItemsResponse,
    DeleteMonitoredItemsRequest, DeleteSubscriptionsRequest, ModifyMonitoredItemsRequest,
    ModifyMonitoredItemsResponse, NotificationMessage, PublishRequest, PublishResponse,
    ReadRequest, RepublishRequest, RequestMessage, ServiceRequest, SetMonitoringModeRequest,
    SubscriptionAcknowledgement, TransferResult, TransferSubscriptionsRequest, WriteRequest,
    WriteValue,
};
use crate::subscription::Subscription;
use crate::types::{DataValue, MonitoringMode, ReadValueId, StatusCode, TimestampsToReturn};

use super::{Route, Session};

impl Session {
    /// Sends any service request and returns its typed response body.
    pub async fn send<R: ServiceRequest>(&self, body: R) -> UaResult<R::Response> {
        self.send_via(Route::Queued, body).await
    }

    pub(crate) async fn send_via<R: ServiceRequest>(
        &self,
        route: Route,
        body: R,
    ) -> UaResult<R::Response> {
        let response = self.transact(RequestMessage::new(body), route).await?;
        R::Response::try_from(response.body)
    }

    // =========================================================================
    // Attribute services
    // =========================================================================

    /// Reads attributes.
    pub async fn read(&self, nodes: Vec<ReadValueId>) -> UaResult<Vec<DataValue>> {
        let expected = nodes.len();
        let response = self
            .send(ReadRequest {
                max_age: Duration::ZERO,
                timestamps_to_return: TimestampsToReturn::Both,
                nodes_to_read: nodes,
            })
            .await?;
        ensure_aligned(ReadRequest::NAME, expected, response.results.len())?;
        Ok(response.results)
    }

    /// Writes attributes.
    pub async fn write(&self, values: Vec<WriteValue>) -> UaResult<Vec<StatusCode>> {
        let expected = values.len();
        let response = self
            .send(WriteRequest {
                nodes_to_write: values,
            })
            .await?;
        ensure_aligned(WriteRequest::NAME, expected, response.results.len())?;
        Ok(response.results)
    }

    /// Browses nodes.
    pub async fn browse(&self, nodes: Vec<BrowseDescription>) -> UaResult<Vec<BrowseResult>> {
        let expected = nodes.len();
        let response = self
            .send(BrowseRequest {
                requested_max_references_per_node: 0,
                nodes_to_browse: nodes,
            })
            .await?;
        ensure_aligned(BrowseRequest::NAME, expected, response.results.len())?;
        Ok(response.results)
    }

    /// Calls methods.
    pub async fn call(&self, methods: Vec<CallMethodRequest>) -> UaResult<Vec<CallMethodResult>> {
        let expected = methods.len();
        let response = self
            .send(CallRequest {
                methods_to_call: methods,
            })
            .await?;
        ensure_aligned(CallRequest::NAME, expected, response.results.len())?;
        Ok(response.results)
    }

    // =========================================================================
    // Subscription services
    // =========================================================================

    /// Creates a subscription and registers it with the publish engine.
    pub async fn create_subscription(&self, settings: SubscriptionSettings) -> UaResult<Subscription> {
        Subscription::create(self, settings).await
    }

    /// Deletes subscriptions on the server and unregisters them locally.
    pub async fn delete_subscriptions(&self, subscription_ids: Vec<u32>) -> UaResult<Vec<StatusCode>> {
        if subscription_ids.is_empty() {
            return Err(UaError::invalid_argument("subscription_ids", "must not be empty"));
        }
        let expected = subscription_ids.len();
        let response = self
            .send(DeleteSubscriptionsRequest {
                subscription_ids: subscription_ids.clone(),
            })
            .await?;
        ensure_aligned(
            DeleteSubscriptionsRequest::NAME,
            expected,
            response.results.len(),
        )?;

        for id in subscription_ids {
            if let Some(subscription) = self.publish_engine().unregister(id) {
                subscription.mark_terminated();
            }
        }
        Ok(response.results)
    }

    /// Transfers subscriptions to this session.
    pub async fn transfer_subscriptions(
        &self,
        subscription_ids: Vec<u32>,
        send_initial_values: bool,
    ) -> UaResult<Vec<TransferResult>> {
        let expected = subscription_ids.len();
        let response = self
            .send(TransferSubscriptionsRequest {
                subscription_ids,
                send_initial_values,
            })
            .await?;
        ensure_aligned(
            TransferSubscriptionsRequest::NAME,
            expected,
            response.results.len(),
        )?;
        Ok(response.results)
    }

    // =========================================================================
    // Monitored item services
    // =========================================================================

    /// Raw CreateMonitoredItems. Prefer [`Subscription::monitor_items`],
    /// which keeps local bookkeeping.
    pub async fn create_monitored_items(
        &self,
        request: CreateMonitoredItemsRequest,
    ) -> UaResult<CreateMonitoredItemsResponse> {
        for item in &request.items_to_create {
            Session::validate_client_handle(item.requested_parameters.client_handle)?;
        }
        let expected = request.items_to_create.len();
        let response = self.send(request).await?;
        ensure_aligned(
            CreateMonitoredItemsRequest::NAME,
            expected,
            response.results.len(),
        )?;
        Ok(response)
    }

    /// Raw ModifyMonitoredItems.
    pub async fn modify_monitored_items(
        &self,
        request: ModifyMonitoredItemsRequest,
    ) -> UaResult<ModifyMonitoredItemsResponse> {
        let expected = request.items_to_modify.len();
        let response = self.send(request).await?;
        ensure_aligned(
            ModifyMonitoredItemsRequest::NAME,
            expected,
            response.results.len(),
        )?;
        Ok(response)
    }

    /// Raw SetMonitoringMode.
    pub async fn set_monitoring_mode(
        &self,
        subscription_id: u32,
        monitoring_mode: MonitoringMode,
        monitored_item_ids: Vec<u32>,
    ) -> UaResult<Vec<StatusCode>> {
        let expected = monitored_item_ids.len();
        let response = self
            .send(SetMonitoringModeRequest {
                subscription_id,
                monitoring_mode,
                monitored_item_ids,
            })
            .await?;
        ensure_aligned(
            SetMonitoringModeRequest::NAME,
            expected,
            response.results.len(),
        )?;
        Ok(response.results)
    }

    /// Raw DeleteMonitoredItems.
    pub async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: Vec<u32>,
    ) -> UaResult<Vec<StatusCode>> {
        let expected = monitored_item_ids.len();
        let response = self
            .send(DeleteMonitoredItemsRequest {
                subscription_id,
                monitored_item_ids,
            })
            .await?;
        ensure_aligned(
            DeleteMonitoredItemsRequest::NAME,
            expected,
            response.results.len(),
        )?;
        Ok(response.results)
    }

    // =========================================================================
    // Publish services
    // =========================================================================

    /// Sends one Publish request outside the publish engine.
    pub async fn publish(
        &self,
        acknowledgements: Vec<SubscriptionAcknowledgement>,
    ) -> UaResult<PublishResponse> {
        self.send(PublishRequest {
            subscription_acknowledgements: acknowledgements,
        })
        .await
    }

    /// Asks the server to retransmit one notification message.
    pub async fn republish(
        &self,
        subscription_id: u32,
        retransmit_sequence_number: u32,
    ) -> UaResult<NotificationMessage> {
        let response = self
            .send(RepublishRequest {
                subscription_id,
                retransmit_sequence_number,
            })
            .await?;
        Ok(response.notification_message)
    }
}
