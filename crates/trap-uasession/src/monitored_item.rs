// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Monitored items.
//!
//! A [`MonitoredItem`] is the local record of one server-side monitored
//! item, keyed by its client handle. The batch functions at the bottom of
//! this module drive CreateMonitoredItems, ModifyMonitoredItems,
//! SetMonitoringMode and DeleteMonitoredItems for any number of items:
//! requests are chunked by `max_monitored_items_per_call`, every result
//! array is checked against its request array and results are applied to
//! the item at the same index.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::{SubscriptionError, UaResult};
use crate::messages::{
    ensure_aligned, CreateMonitoredItemsRequest, DeleteMonitoredItemsRequest,
    ModifyMonitoredItemsRequest, MonitoredItemCreateRequest, MonitoredItemCreateResult,
    MonitoredItemModifyRequest, MonitoredItemModifyResult, ServiceRequest,
    SetMonitoringModeRequest,
};
use crate::session::{Route, Session};
use crate::subscription::{Subscription, SubscriptionInner};
use crate::types::{
    DataValue, FilterResult, MonitoringMode, MonitoringParameters, ReadValueId, StatusCode,
    TimestampsToReturn,
};

/// Status of an item that has not been created on the server yet.
const NOT_CREATED: StatusCode = StatusCode::BAD_MONITORED_ITEM_ID_INVALID;

// =============================================================================
// MonitoredItemState
// =============================================================================

/// Server-visible state of a monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemState {
    /// Server-assigned id; 0 until created.
    pub monitored_item_id: u32,
    /// Status of the last create/modify result.
    pub status: StatusCode,
    /// Requested parameters, including the client handle.
    pub parameters: MonitoringParameters,
    /// Monitoring mode.
    pub monitoring_mode: MonitoringMode,
    /// Timestamps requested with notifications.
    pub timestamps: TimestampsToReturn,
    /// Sampling interval revised by the server.
    pub revised_sampling_interval: Duration,
    /// Queue size revised by the server.
    pub revised_queue_size: u32,
    /// Filter result.
    pub filter_result: FilterResult,
    /// Last value delivered by a data change notification.
    pub last_value: Option<DataValue>,
}

// =============================================================================
// MonitoredItem
// =============================================================================

/// Handle to a monitored item.
#[derive(Clone)]
pub struct MonitoredItem {
    inner: Arc<MonitoredItemInner>,
}

struct MonitoredItemInner {
    client_handle: u32,
    item_to_monitor: ReadValueId,
    subscription: Weak<SubscriptionInner>,
    state: RwLock<MonitoredItemState>,
}

impl MonitoredItem {
    pub(crate) fn new(
        subscription: Weak<SubscriptionInner>,
        client_handle: u32,
        item_to_monitor: ReadValueId,
        mut parameters: MonitoringParameters,
        monitoring_mode: MonitoringMode,
        timestamps: TimestampsToReturn,
    ) -> Self {
        parameters.client_handle = client_handle;
        Self {
            inner: Arc::new(MonitoredItemInner {
                client_handle,
                item_to_monitor,
                subscription,
                state: RwLock::new(MonitoredItemState {
                    monitored_item_id: 0,
                    status: NOT_CREATED,
                    revised_sampling_interval: parameters.sampling_interval,
                    revised_queue_size: parameters.queue_size,
                    parameters,
                    monitoring_mode,
                    timestamps,
                    filter_result: FilterResult::None,
                    last_value: None,
                }),
            }),
        }
    }

    /// Client handle; stable across subscription recreation.
    pub fn client_handle(&self) -> u32 {
        self.inner.client_handle
    }

    /// The monitored attribute.
    pub fn item_to_monitor(&self) -> &ReadValueId {
        &self.inner.item_to_monitor
    }

    /// Server-assigned id; 0 until created. Changes on recreation.
    pub fn monitored_item_id(&self) -> u32 {
        self.inner.state.read().monitored_item_id
    }

    /// Status of the last create or modify.
    pub fn status(&self) -> StatusCode {
        self.inner.state.read().status
    }

    /// Returns `true` if the server holds this item.
    pub fn is_created(&self) -> bool {
        let state = self.inner.state.read();
        state.monitored_item_id != 0 && state.status.is_good()
    }

    /// Requested parameters.
    pub fn parameters(&self) -> MonitoringParameters {
        self.inner.state.read().parameters.clone()
    }

    /// Monitoring mode.
    pub fn monitoring_mode(&self) -> MonitoringMode {
        self.inner.state.read().monitoring_mode
    }

    /// Timestamps requested with notifications.
    pub fn timestamps(&self) -> TimestampsToReturn {
        self.inner.state.read().timestamps
    }

    /// Sampling interval revised by the server.
    pub fn revised_sampling_interval(&self) -> Duration {
        self.inner.state.read().revised_sampling_interval
    }

    /// Queue size revised by the server.
    pub fn revised_queue_size(&self) -> u32 {
        self.inner.state.read().revised_queue_size
    }

    /// Filter result of the last create or modify.
    pub fn filter_result(&self) -> FilterResult {
        self.inner.state.read().filter_result.clone()
    }

    /// Last value delivered.
    pub fn last_value(&self) -> Option<DataValue> {
        self.inner.state.read().last_value.clone()
    }

    /// Copy of the whole state.
    pub fn snapshot(&self) -> MonitoredItemState {
        self.inner.state.read().clone()
    }

    fn subscription(&self) -> UaResult<Subscription> {
        Subscription::upgrade(&self.inner.subscription).ok_or_else(|| {
            SubscriptionError::Terminated {
                subscription_id: 0,
            }
            .into()
        })
    }

    /// Changes sampling parameters. A bad result is an error.
    pub async fn modify(&self, parameters: MonitoringParameters) -> UaResult<()> {
        let statuses = self
            .subscription()?
            .modify_items(std::slice::from_ref(self), vec![parameters])
            .await?;
        self.single_result(&statuses)
    }

    /// Changes the monitoring mode. A bad result is an error.
    pub async fn set_monitoring_mode(&self, mode: MonitoringMode) -> UaResult<()> {
        let statuses = self
            .subscription()?
            .set_items_monitoring_mode(std::slice::from_ref(self), mode)
            .await?;
        self.single_result(&statuses)
    }

    /// Deletes the item on the server and forgets it locally.
    pub async fn delete(&self) -> UaResult<()> {
        let statuses = self
            .subscription()?
            .delete_items(std::slice::from_ref(self))
            .await?;
        self.single_result(&statuses)
    }

    fn single_result(&self, statuses: &[StatusCode]) -> UaResult<()> {
        match statuses.first() {
            Some(status) if status.is_bad() => Err(SubscriptionError::MonitoredItemFailed {
                client_handle: self.inner.client_handle,
                status: *status,
            }
            .into()),
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Toolbox hooks
    // =========================================================================

    pub(crate) fn create_request(&self) -> MonitoredItemCreateRequest {
        let state = self.inner.state.read();
        MonitoredItemCreateRequest {
            item_to_monitor: self.inner.item_to_monitor.clone(),
            monitoring_mode: state.monitoring_mode,
            requested_parameters: state.parameters.clone(),
        }
    }

    pub(crate) fn apply_create_result(&self, result: MonitoredItemCreateResult) {
        let mut state = self.inner.state.write();
        state.status = result.status;
        if result.status.is_good() {
            state.monitored_item_id = result.monitored_item_id;
            state.revised_sampling_interval = result.revised_sampling_interval;
            state.revised_queue_size = result.revised_queue_size;
            state.filter_result = result.filter_result;
        } else {
            state.monitored_item_id = 0;
        }
    }

    fn apply_modify_result(
        &self,
        parameters: MonitoringParameters,
        result: MonitoredItemModifyResult,
    ) {
        let mut state = self.inner.state.write();
        if result.status.is_good() {
            state.parameters = parameters;
            state.revised_sampling_interval = result.revised_sampling_interval;
            state.revised_queue_size = result.revised_queue_size;
            state.filter_result = result.filter_result;
        }
        state.status = result.status;
    }

    fn apply_monitoring_mode(&self, mode: MonitoringMode) {
        self.inner.state.write().monitoring_mode = mode;
    }

    pub(crate) fn mark_deleted(&self) {
        let mut state = self.inner.state.write();
        state.monitored_item_id = 0;
        state.status = NOT_CREATED;
    }

    pub(crate) fn record_value(&self, value: DataValue) {
        self.inner.state.write().last_value = Some(value);
    }
}

impl fmt::Debug for MonitoredItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("MonitoredItem")
            .field("client_handle", &self.inner.client_handle)
            .field("node_id", &self.inner.item_to_monitor.node_id)
            .field("monitored_item_id", &state.monitored_item_id)
            .field("status", &state.status)
            .finish()
    }
}

// =============================================================================
// MonitoredItemGroup
// =============================================================================

/// Items created by one [`Subscription::monitor_items`] call.
///
/// Items the server rejected stay in the group with a bad status.
#[derive(Debug, Clone)]
pub struct MonitoredItemGroup {
    items: Vec<MonitoredItem>,
    subscription: Weak<SubscriptionInner>,
}

impl MonitoredItemGroup {
    pub(crate) fn new(items: Vec<MonitoredItem>, subscription: Weak<SubscriptionInner>) -> Self {
        Self {
            items,
            subscription,
        }
    }

    /// All items, in request order.
    pub fn items(&self) -> &[MonitoredItem] {
        &self.items
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the group is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item with this client handle.
    pub fn get(&self, client_handle: u32) -> Option<&MonitoredItem> {
        self.items
            .iter()
            .find(|item| item.client_handle() == client_handle)
    }

    /// Per-item status, in request order.
    pub fn statuses(&self) -> Vec<StatusCode> {
        self.items.iter().map(MonitoredItem::status).collect()
    }

    /// Items the server accepted.
    pub fn created(&self) -> impl Iterator<Item = &MonitoredItem> {
        self.items.iter().filter(|item| item.is_created())
    }

    /// Items the server rejected.
    pub fn failed(&self) -> impl Iterator<Item = &MonitoredItem> {
        self.items.iter().filter(|item| !item.is_created())
    }

    fn subscription(&self) -> UaResult<Subscription> {
        Subscription::upgrade(&self.subscription).ok_or_else(|| {
            SubscriptionError::Terminated {
                subscription_id: 0,
            }
            .into()
        })
    }

    /// Applies the same parameters to every item.
    pub async fn modify(&self, parameters: MonitoringParameters) -> UaResult<Vec<StatusCode>> {
        let parameters = vec![parameters; self.items.len()];
        self.subscription()?
            .modify_items(&self.items, parameters)
            .await
    }

    /// Changes the monitoring mode of every item.
    pub async fn set_monitoring_mode(&self, mode: MonitoringMode) -> UaResult<Vec<StatusCode>> {
        self.subscription()?
            .set_items_monitoring_mode(&self.items, mode)
            .await
    }

    /// Deletes every item.
    pub async fn delete(&self) -> UaResult<Vec<StatusCode>> {
        self.subscription()?.delete_items(&self.items).await
    }
}

// =============================================================================
// Batch toolbox
// =============================================================================

fn chunk_size(session: &Session) -> usize {
    session.config().max_monitored_items_per_call.max(1)
}

/// Creates `items` on the server and attaches the accepted ones to
/// `subscription`.
///
/// Returns one status per item. Items of chunks sent before a failing chunk
/// keep their results.
pub(crate) async fn create_batch(
    session: &Session,
    route: Route,
    subscription: &Subscription,
    items: &[MonitoredItem],
    timestamps: TimestampsToReturn,
) -> UaResult<Vec<StatusCode>> {
    for item in items {
        Session::validate_client_handle(item.client_handle())?;
    }

    let mut statuses = Vec::with_capacity(items.len());
    for chunk in items.chunks(chunk_size(session)) {
        let request = CreateMonitoredItemsRequest {
            subscription_id: subscription.id(),
            timestamps_to_return: timestamps,
            items_to_create: chunk.iter().map(MonitoredItem::create_request).collect(),
        };
        trace!(
            subscription_id = subscription.id(),
            count = chunk.len(),
            "Creating monitored items"
        );
        let response = session.send_via(route, request).await?;
        ensure_aligned(
            CreateMonitoredItemsRequest::NAME,
            chunk.len(),
            response.results.len(),
        )?;

        for (item, result) in chunk.iter().zip(response.results) {
            let status = result.status;
            item.apply_create_result(result);
            if status.is_good() {
                subscription.attach(item.clone());
            } else {
                debug!(
                    client_handle = item.client_handle(),
                    node_id = %item.item_to_monitor().node_id,
                    %status,
                    "Monitored item rejected"
                );
            }
            statuses.push(status);
        }
    }
    Ok(statuses)
}

/// Modifies `items`; `parameters[i]` applies to `items[i]`.
pub(crate) async fn modify_batch(
    session: &Session,
    subscription: &Subscription,
    items: &[MonitoredItem],
    parameters: Vec<MonitoringParameters>,
    timestamps: TimestampsToReturn,
) -> UaResult<Vec<StatusCode>> {
    ensure_aligned(
        ModifyMonitoredItemsRequest::NAME,
        items.len(),
        parameters.len(),
    )?;

    let parameters: Vec<MonitoringParameters> = items
        .iter()
        .zip(parameters)
        .map(|(item, mut parameters)| {
            parameters.client_handle = item.client_handle();
            parameters
        })
        .collect();

    let size = chunk_size(session);
    let mut statuses = Vec::with_capacity(items.len());
    for (chunk, chunk_parameters) in items.chunks(size).zip(parameters.chunks(size)) {
        let request = ModifyMonitoredItemsRequest {
            subscription_id: subscription.id(),
            timestamps_to_return: timestamps,
            items_to_modify: chunk
                .iter()
                .zip(chunk_parameters)
                .map(|(item, parameters)| MonitoredItemModifyRequest {
                    monitored_item_id: item.monitored_item_id(),
                    requested_parameters: parameters.clone(),
                })
                .collect(),
        };
        let response = session.send(request).await?;
        ensure_aligned(
            ModifyMonitoredItemsRequest::NAME,
            chunk.len(),
            response.results.len(),
        )?;

        for ((item, parameters), result) in chunk
            .iter()
            .zip(chunk_parameters.iter().cloned())
            .zip(response.results)
        {
            statuses.push(result.status);
            item.apply_modify_result(parameters, result);
        }
    }
    Ok(statuses)
}

/// Sets the monitoring mode of `items`.
pub(crate) async fn set_mode_batch(
    session: &Session,
    subscription: &Subscription,
    items: &[MonitoredItem],
    mode: MonitoringMode,
) -> UaResult<Vec<StatusCode>> {
    let mut statuses = Vec::with_capacity(items.len());
    for chunk in items.chunks(chunk_size(session)) {
        let request = SetMonitoringModeRequest {
            subscription_id: subscription.id(),
            monitoring_mode: mode,
            monitored_item_ids: chunk.iter().map(MonitoredItem::monitored_item_id).collect(),
        };
        let response = session.send(request).await?;
        ensure_aligned(
            SetMonitoringModeRequest::NAME,
            chunk.len(),
            response.results.len(),
        )?;

        for (item, status) in chunk.iter().zip(response.results) {
            if status.is_good() {
                item.apply_monitoring_mode(mode);
            }
            statuses.push(status);
        }
    }
    Ok(statuses)
}

/// Deletes `items` and detaches them from `subscription`.
pub(crate) async fn delete_batch(
    session: &Session,
    subscription: &Subscription,
    items: &[MonitoredItem],
) -> UaResult<Vec<StatusCode>> {
    let mut statuses = Vec::with_capacity(items.len());
    for chunk in items.chunks(chunk_size(session)) {
        let request = DeleteMonitoredItemsRequest {
            subscription_id: subscription.id(),
            monitored_item_ids: chunk.iter().map(MonitoredItem::monitored_item_id).collect(),
        };
        let response = session.send(request).await?;
        ensure_aligned(
            DeleteMonitoredItemsRequest::NAME,
            chunk.len(),
            response.results.len(),
        )?;

        for (item, status) in chunk.iter().zip(response.results) {
            // An id the server no longer knows is gone either way.
            if status.is_good() || status.sub_code() == NOT_CREATED.sub_code() {
                subscription.detach(item.client_handle());
                item.mark_deleted();
            }
            statuses.push(status);
        }
    }
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    fn item(handle: u32) -> MonitoredItem {
        MonitoredItem::new(
            Weak::new(),
            handle,
            ReadValueId::value_of(NodeId::numeric(2, handle)),
            MonitoringParameters::default(),
            MonitoringMode::Reporting,
            TimestampsToReturn::Both,
        )
    }

    #[test]
    fn test_new_item_is_not_created() {
        let item = item(7);
        assert_eq!(item.client_handle(), 7);
        assert_eq!(item.parameters().client_handle, 7);
        assert_eq!(item.monitored_item_id(), 0);
        assert!(!item.is_created());
    }

    #[test]
    fn test_apply_create_result() {
        let item = item(3);
        item.apply_create_result(MonitoredItemCreateResult {
            status: StatusCode::GOOD,
            monitored_item_id: 42,
            revised_sampling_interval: Duration::from_millis(500),
            revised_queue_size: 4,
            filter_result: FilterResult::None,
        });
        assert!(item.is_created());
        assert_eq!(item.monitored_item_id(), 42);
        assert_eq!(item.revised_sampling_interval(), Duration::from_millis(500));

        item.apply_create_result(MonitoredItemCreateResult {
            status: StatusCode::BAD_NODE_ID_UNKNOWN,
            monitored_item_id: 0,
            revised_sampling_interval: Duration::ZERO,
            revised_queue_size: 0,
            filter_result: FilterResult::None,
        });
        assert!(!item.is_created());
        assert_eq!(item.status(), StatusCode::BAD_NODE_ID_UNKNOWN);
    }

    #[test]
    fn test_modify_keeps_parameters_on_failure() {
        let item = item(5);
        let requested = MonitoringParameters::with_sampling_interval(Duration::from_millis(10));
        item.apply_modify_result(
            requested,
            MonitoredItemModifyResult {
                status: StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                revised_sampling_interval: Duration::ZERO,
                revised_queue_size: 0,
                filter_result: FilterResult::None,
            },
        );
        assert_eq!(
            item.parameters().sampling_interval,
            MonitoringParameters::default().sampling_interval
        );
    }

    #[test]
    fn test_group_partitions_by_status() {
        let good = item(1);
        good.apply_create_result(MonitoredItemCreateResult {
            status: StatusCode::GOOD,
            monitored_item_id: 10,
            revised_sampling_interval: Duration::from_millis(250),
            revised_queue_size: 10,
            filter_result: FilterResult::None,
        });
        let group = MonitoredItemGroup::new(vec![good, item(2)], Weak::new());
        assert_eq!(group.len(), 2);
        assert_eq!(group.created().count(), 1);
        assert_eq!(group.failed().next().map(MonitoredItem::client_handle), Some(2));
        assert!(group.get(2).is_some());
    }
}
