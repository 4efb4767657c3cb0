// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscriptions.
//!
//! A [`Subscription`] is registered with the publish engine of its session
//! for as long as it is alive. Its id may change when the reconnection
//! controller has to recreate it on a new server session; monitored items
//! keep their client handles across that change, so application code keyed
//! by client handle is unaffected.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::config::SubscriptionSettings;
use crate::error::{SessionError, SubscriptionError, UaError, UaResult};
use crate::events::{SubscriptionEvent, EVENT_CHANNEL_CAPACITY};
use crate::messages::{
    ensure_aligned, CreateSubscriptionRequest, CreateSubscriptionResponse,
    DeleteSubscriptionsRequest, ModifySubscriptionRequest, NotificationData, NotificationMessage,
    ServiceRequest, SetPublishingModeRequest, SetTriggeringRequest,
};
use crate::monitored_item::{self, MonitoredItem, MonitoredItemGroup};
use crate::publish::is_newer;
use crate::session::{Route, Session, SessionInner};
use crate::stats::{SubscriptionStats, SubscriptionStatsSnapshot};
use crate::types::{
    MonitoringMode, MonitoringParameters, ReadValueId, StatusCode, TimestampsToReturn,
};

/// Parameters revised by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisedParameters {
    /// Publishing interval.
    pub publishing_interval: Duration,
    /// Lifetime count.
    pub lifetime_count: u32,
    /// Max keep-alive count.
    pub keepalive_count: u32,
}

impl RevisedParameters {
    /// Longest silence before the server sends a keep-alive.
    pub fn keep_alive_period(&self) -> Duration {
        self.publishing_interval
            .saturating_mul(self.keepalive_count.max(1))
    }
}

/// Handle to a subscription.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

pub(crate) struct SubscriptionInner {
    session: Weak<SessionInner>,
    id: AtomicU32,
    settings: RwLock<SubscriptionSettings>,
    revised: RwLock<RevisedParameters>,
    items: RwLock<BTreeMap<u32, MonitoredItem>>,
    last_sequence_number: AtomicU32,
    terminated: AtomicBool,
    events: broadcast::Sender<SubscriptionEvent>,
    stats: SubscriptionStats,
}

fn create_request(settings: &SubscriptionSettings) -> CreateSubscriptionRequest {
    CreateSubscriptionRequest {
        requested_publishing_interval: settings.publishing_interval,
        requested_lifetime_count: settings.lifetime_count,
        requested_max_keep_alive_count: settings.keepalive_count,
        max_notifications_per_publish: settings.max_notifications_per_publish,
        publishing_enabled: settings.publishing_enabled,
        priority: settings.priority,
    }
}

fn revised_from(response: &CreateSubscriptionResponse) -> RevisedParameters {
    RevisedParameters {
        publishing_interval: response.revised_publishing_interval,
        lifetime_count: response.revised_lifetime_count,
        keepalive_count: response.revised_max_keep_alive_count,
    }
}

impl Subscription {
    /// Creates a subscription on the server and registers it with the
    /// session's publish engine.
    pub(crate) async fn create(session: &Session, settings: SubscriptionSettings) -> UaResult<Self> {
        settings.validate()?;
        let response = session.send(create_request(&settings)).await?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let subscription = Self {
            inner: Arc::new(SubscriptionInner {
                session: session.downgrade(),
                id: AtomicU32::new(response.subscription_id),
                settings: RwLock::new(settings),
                revised: RwLock::new(revised_from(&response)),
                items: RwLock::new(BTreeMap::new()),
                last_sequence_number: AtomicU32::new(0),
                terminated: AtomicBool::new(false),
                events,
                stats: SubscriptionStats::default(),
            }),
        };

        info!(
            session_key = session.key(),
            subscription_id = response.subscription_id,
            revised_publishing_interval_ms =
                response.revised_publishing_interval.as_millis() as u64,
            "Subscription created"
        );
        session.publish_engine().register(subscription.clone());
        subscription.emit(SubscriptionEvent::Started {
            subscription_id: response.subscription_id,
            revised_publishing_interval: response.revised_publishing_interval,
        });
        Ok(subscription)
    }

    /// Returns `true` if both handles refer to the same subscription.
    pub fn ptr_eq(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<SubscriptionInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn downgrade(&self) -> Weak<SubscriptionInner> {
        Arc::downgrade(&self.inner)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Server-assigned id. Changes when the subscription is recreated.
    pub fn id(&self) -> u32 {
        self.inner.id.load(Ordering::Acquire)
    }

    /// Requested settings.
    pub fn settings(&self) -> SubscriptionSettings {
        self.inner.settings.read().clone()
    }

    /// Parameters revised by the server.
    pub fn revised(&self) -> RevisedParameters {
        *self.inner.revised.read()
    }

    /// Revised publishing interval.
    pub fn revised_publishing_interval(&self) -> Duration {
        self.inner.revised.read().publishing_interval
    }

    /// Longest silence before the server sends a keep-alive.
    pub fn keep_alive_period(&self) -> Duration {
        self.inner.revised.read().keep_alive_period()
    }

    /// Monitored items ordered by client handle.
    pub fn items(&self) -> Vec<MonitoredItem> {
        self.inner.items.read().values().cloned().collect()
    }

    /// Monitored item with this client handle.
    pub fn item(&self, client_handle: u32) -> Option<MonitoredItem> {
        self.inner.items.read().get(&client_handle).cloned()
    }

    /// Number of monitored items.
    pub fn item_count(&self) -> usize {
        self.inner.items.read().len()
    }

    /// Highest sequence number delivered.
    pub fn last_sequence_number(&self) -> u32 {
        self.inner.last_sequence_number.load(Ordering::Acquire)
    }

    /// Returns `true` once the subscription is gone.
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// Owning session, while it exists.
    pub fn session(&self) -> Option<Session> {
        Session::upgrade(&self.inner.session)
    }

    /// Subscribes to subscription events.
    pub fn events(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.inner.events.subscribe()
    }

    /// Notification counters.
    pub fn stats(&self) -> SubscriptionStatsSnapshot {
        self.inner.stats.snapshot()
    }

    fn emit(&self, event: SubscriptionEvent) {
        trace!(
            subscription_id = self.id(),
            event = event.name(),
            "Subscription event"
        );
        let _ = self.inner.events.send(event);
    }

    fn live_session(&self) -> UaResult<Session> {
        if self.is_terminated() {
            return Err(SubscriptionError::Terminated {
                subscription_id: self.id(),
            }
            .into());
        }
        self.session().ok_or_else(|| SessionError::Closed.into())
    }

    pub(crate) fn attach(&self, item: MonitoredItem) {
        self.inner.items.write().insert(item.client_handle(), item);
    }

    pub(crate) fn detach(&self, client_handle: u32) -> Option<MonitoredItem> {
        self.inner.items.write().remove(&client_handle)
    }

    // =========================================================================
    // Monitored items
    // =========================================================================

    /// Monitors one attribute.
    ///
    /// A bad create result is returned as
    /// [`SubscriptionError::MonitoredItemFailed`].
    pub async fn monitor(
        &self,
        item_to_monitor: ReadValueId,
        parameters: MonitoringParameters,
        timestamps: TimestampsToReturn,
        mode: MonitoringMode,
    ) -> UaResult<MonitoredItem> {
        let session = self.live_session()?;
        let item = MonitoredItem::new(
            self.downgrade(),
            session.next_client_handle(),
            item_to_monitor,
            parameters,
            mode,
            timestamps,
        );

        let statuses = monitored_item::create_batch(
            &session,
            Route::Queued,
            self,
            std::slice::from_ref(&item),
            timestamps,
        )
        .await?;
        let status = statuses
            .first()
            .copied()
            .unwrap_or(StatusCode::BAD_UNKNOWN_RESPONSE);
        self.emit(SubscriptionEvent::ItemAdded {
            client_handle: item.client_handle(),
            status,
        });

        if status.is_bad() {
            return Err(SubscriptionError::MonitoredItemFailed {
                client_handle: item.client_handle(),
                status,
            }
            .into());
        }
        Ok(item)
    }

    /// Monitors many attributes with shared parameters.
    ///
    /// Each item gets its own client handle. Items the server rejects stay
    /// in the returned group with their bad status.
    pub async fn monitor_items(
        &self,
        items_to_monitor: Vec<ReadValueId>,
        parameters: MonitoringParameters,
        timestamps: TimestampsToReturn,
    ) -> UaResult<MonitoredItemGroup> {
        let session = self.live_session()?;
        let items: Vec<MonitoredItem> = items_to_monitor
            .into_iter()
            .map(|item_to_monitor| {
                MonitoredItem::new(
                    self.downgrade(),
                    session.next_client_handle(),
                    item_to_monitor,
                    parameters.clone(),
                    MonitoringMode::Reporting,
                    timestamps,
                )
            })
            .collect();

        let statuses =
            monitored_item::create_batch(&session, Route::Queued, self, &items, timestamps)
                .await?;
        for (item, status) in items.iter().zip(statuses) {
            self.emit(SubscriptionEvent::ItemAdded {
                client_handle: item.client_handle(),
                status,
            });
        }
        Ok(MonitoredItemGroup::new(items, self.downgrade()))
    }

    /// Modifies items; `parameters[i]` applies to `items[i]`.
    pub async fn modify_items(
        &self,
        items: &[MonitoredItem],
        parameters: Vec<MonitoringParameters>,
    ) -> UaResult<Vec<StatusCode>> {
        let session = self.live_session()?;
        let timestamps = items
            .first()
            .map(MonitoredItem::timestamps)
            .unwrap_or_default();
        monitored_item::modify_batch(&session, self, items, parameters, timestamps).await
    }

    /// Sets the monitoring mode of items.
    pub async fn set_items_monitoring_mode(
        &self,
        items: &[MonitoredItem],
        mode: MonitoringMode,
    ) -> UaResult<Vec<StatusCode>> {
        let session = self.live_session()?;
        monitored_item::set_mode_batch(&session, self, items, mode).await
    }

    /// Deletes items.
    pub async fn delete_items(&self, items: &[MonitoredItem]) -> UaResult<Vec<StatusCode>> {
        let session = self.live_session()?;
        monitored_item::delete_batch(&session, self, items).await
    }

    /// Links `triggering` to the items in `links_to_add` and unlinks it from
    /// the items in `links_to_remove`.
    pub async fn set_triggering(
        &self,
        triggering: &MonitoredItem,
        links_to_add: &[MonitoredItem],
        links_to_remove: &[MonitoredItem],
    ) -> UaResult<(Vec<StatusCode>, Vec<StatusCode>)> {
        let session = self.live_session()?;
        for item in std::iter::once(triggering)
            .chain(links_to_add)
            .chain(links_to_remove)
        {
            if self.item(item.client_handle()).is_none() {
                return Err(SubscriptionError::MonitoredItemNotFound {
                    client_handle: item.client_handle(),
                }
                .into());
            }
        }

        let response = session
            .send(SetTriggeringRequest {
                subscription_id: self.id(),
                triggering_item_id: triggering.monitored_item_id(),
                links_to_add: links_to_add
                    .iter()
                    .map(MonitoredItem::monitored_item_id)
                    .collect(),
                links_to_remove: links_to_remove
                    .iter()
                    .map(MonitoredItem::monitored_item_id)
                    .collect(),
            })
            .await?;
        ensure_aligned(
            SetTriggeringRequest::NAME,
            links_to_add.len(),
            response.add_results.len(),
        )?;
        ensure_aligned(
            SetTriggeringRequest::NAME,
            links_to_remove.len(),
            response.remove_results.len(),
        )?;
        Ok((response.add_results, response.remove_results))
    }

    // =========================================================================
    // Subscription services
    // =========================================================================

    /// Changes publishing parameters.
    pub async fn modify(&self, settings: SubscriptionSettings) -> UaResult<RevisedParameters> {
        settings.validate()?;
        let session = self.live_session()?;
        let response = session
            .send(ModifySubscriptionRequest {
                subscription_id: self.id(),
                requested_publishing_interval: settings.publishing_interval,
                requested_lifetime_count: settings.lifetime_count,
                requested_max_keep_alive_count: settings.keepalive_count,
                max_notifications_per_publish: settings.max_notifications_per_publish,
                priority: settings.priority,
            })
            .await?;

        let revised = RevisedParameters {
            publishing_interval: response.revised_publishing_interval,
            lifetime_count: response.revised_lifetime_count,
            keepalive_count: response.revised_max_keep_alive_count,
        };
        let publishing_enabled = self.inner.settings.read().publishing_enabled;
        *self.inner.settings.write() = SubscriptionSettings {
            publishing_enabled,
            ..settings
        };
        *self.inner.revised.write() = revised;
        debug!(subscription_id = self.id(), ?revised, "Subscription modified");
        Ok(revised)
    }

    /// Enables or disables publishing.
    pub async fn set_publishing_mode(&self, publishing_enabled: bool) -> UaResult<()> {
        let session = self.live_session()?;
        let response = session
            .send(SetPublishingModeRequest {
                publishing_enabled,
                subscription_ids: vec![self.id()],
            })
            .await?;
        ensure_aligned(SetPublishingModeRequest::NAME, 1, response.results.len())?;
        if let Some(status) = response.results.first().filter(|s| s.is_bad()) {
            return Err(UaError::service(SetPublishingModeRequest::NAME, *status));
        }
        self.inner.settings.write().publishing_enabled = publishing_enabled;
        Ok(())
    }

    /// Deletes the monitored items, then the subscription on the server.
    ///
    /// Idempotent. A server that no longer knows the id counts as success.
    /// Afterwards the subscription holds no items.
    pub async fn terminate(&self) -> UaResult<()> {
        if self.is_terminated() {
            return Ok(());
        }
        let Some(session) = self.session() else {
            self.release_items();
            self.mark_terminated();
            return Ok(());
        };

        let subscription_id = self.id();
        let created: Vec<MonitoredItem> = self
            .items()
            .into_iter()
            .filter(MonitoredItem::is_created)
            .collect();
        if !created.is_empty() {
            match monitored_item::delete_batch(&session, self, &created).await {
                Ok(_) => {}
                Err(error) if error.has_status(StatusCode::BAD_SUBSCRIPTION_ID_INVALID) => {
                    debug!(subscription_id, "Subscription already gone on the server");
                }
                Err(error) => return Err(error),
            }
        }

        let result = session
            .send(DeleteSubscriptionsRequest {
                subscription_ids: vec![subscription_id],
            })
            .await
            .and_then(|response| {
                ensure_aligned(DeleteSubscriptionsRequest::NAME, 1, response.results.len())?;
                match response.results.first() {
                    Some(status) if status.is_bad() => Err(UaError::service(
                        DeleteSubscriptionsRequest::NAME,
                        *status,
                    )),
                    _ => Ok(()),
                }
            });
        match result {
            Ok(()) => {}
            Err(error) if error.has_status(StatusCode::BAD_SUBSCRIPTION_ID_INVALID) => {
                debug!(subscription_id, "Subscription already gone on the server");
            }
            Err(error) => return Err(error),
        }

        session.publish_engine().unregister_exact(self);
        self.release_items();
        self.mark_terminated();
        Ok(())
    }

    /// Drops every local item, failed ones included.
    fn release_items(&self) {
        let items = std::mem::take(&mut *self.inner.items.write());
        for item in items.into_values() {
            item.mark_deleted();
        }
    }

    /// Marks the subscription terminated locally and raises `terminated`
    /// once.
    pub(crate) fn mark_terminated(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(subscription_id = self.id(), "Subscription terminated");
        self.emit(SubscriptionEvent::Terminated);
    }

    /// Creates the subscription again on the session's current server
    /// session and re-adds every monitored item with its client handle.
    ///
    /// Returns the new subscription id. Items the server rejects keep their
    /// bad status and are reported through `internal_error`.
    pub(crate) async fn recreate(&self, session: &Session) -> UaResult<u32> {
        let old_id = self.id();
        let settings = self.settings();
        let response = session
            .send_via(Route::Direct, create_request(&settings))
            .await?;

        let new_id = response.subscription_id;
        self.inner.id.store(new_id, Ordering::Release);
        *self.inner.revised.write() = revised_from(&response);
        self.inner.last_sequence_number.store(0, Ordering::Release);
        session.publish_engine().rekey(old_id, self.clone());

        let items = self.items();
        let mut by_timestamps: Vec<(TimestampsToReturn, Vec<MonitoredItem>)> = Vec::new();
        for item in items {
            let timestamps = item.timestamps();
            match by_timestamps.iter_mut().find(|(t, _)| *t == timestamps) {
                Some((_, group)) => group.push(item),
                None => by_timestamps.push((timestamps, vec![item])),
            }
        }

        let mut rejected = 0usize;
        for (timestamps, group) in by_timestamps {
            let statuses =
                monitored_item::create_batch(session, Route::Direct, self, &group, timestamps)
                    .await?;
            rejected += statuses.iter().filter(|s| s.is_bad()).count();
        }

        self.inner.stats.record_recreation();
        info!(
            session_key = session.key(),
            old_id,
            new_id,
            items = self.item_count(),
            rejected,
            "Subscription recreated"
        );
        if rejected > 0 {
            self.emit(SubscriptionEvent::InternalError {
                message: format!("{rejected} monitored item(s) rejected on recreation"),
            });
        }
        self.emit(SubscriptionEvent::Started {
            subscription_id: new_id,
            revised_publishing_interval: response.revised_publishing_interval,
        });
        Ok(new_id)
    }

    // =========================================================================
    // Notification delivery
    // =========================================================================

    pub(crate) fn deliver(&self, message: NotificationMessage) {
        let sequence_number = message.sequence_number;
        let _ = self.inner.last_sequence_number.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |last| (last == 0 || is_newer(sequence_number, last)).then_some(sequence_number),
        );

        for data in message.notification_data {
            match data {
                NotificationData::DataChange(notifications) => {
                    self.inner
                        .stats
                        .record_data_changes(notifications.len() as u64);
                    for notification in notifications {
                        if let Some(item) = self.item(notification.client_handle) {
                            item.record_value(notification.value.clone());
                        }
                        self.emit(SubscriptionEvent::DataChange {
                            client_handle: notification.client_handle,
                            value: notification.value,
                        });
                    }
                }
                NotificationData::Event(fields) => {
                    self.inner.stats.record_events(fields.len() as u64);
                    for fields in fields {
                        self.emit(SubscriptionEvent::Event { fields });
                    }
                }
                NotificationData::StatusChange(status) => {
                    self.emit(SubscriptionEvent::StatusChanged { status });
                    if status.is_bad() {
                        warn!(
                            subscription_id = self.id(),
                            %status,
                            "Subscription ended by the server"
                        );
                        if let Some(session) = self.session() {
                            session.publish_engine().unregister_exact(self);
                        }
                        self.mark_terminated();
                    }
                }
            }
        }
    }

    pub(crate) fn on_keep_alive(&self, sequence_number: u32) {
        self.inner.stats.record_keep_alive();
        self.emit(SubscriptionEvent::KeepAlive { sequence_number });
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("items", &self.item_count())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive_period() {
        let revised = RevisedParameters {
            publishing_interval: Duration::from_millis(500),
            lifetime_count: 30,
            keepalive_count: 10,
        };
        assert_eq!(revised.keep_alive_period(), Duration::from_secs(5));

        let zero = RevisedParameters {
            keepalive_count: 0,
            ..revised
        };
        assert_eq!(zero.keep_alive_period(), Duration::from_millis(500));
    }

    #[test]
    fn test_create_request_carries_settings() {
        let settings = SubscriptionSettings {
            priority: 7,
            ..SubscriptionSettings::with_interval(Duration::from_millis(200))
        };
        let request = create_request(&settings);
        assert_eq!(request.requested_publishing_interval, Duration::from_millis(200));
        assert_eq!(request.requested_max_keep_alive_count, settings.keepalive_count);
        assert_eq!(request.priority, 7);
    }
}
