// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registration ledger.
//!
//! Tracks in-flight and completed service/host registrations, joins
//! identical concurrent attempts, and fans one result out to every joined
//! callback in registration order.
//!
//! The ledger is a cheap cloneable handle over shared interior state so it
//! can be queried from inside result callbacks while the owning publisher is
//! borrowed elsewhere (everything runs on the single cooperative thread).
//! Callbacks are never invoked while a ledger borrow is held: registrations
//! are taken out of the map first, then completed or dropped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::rc::Rc;

use tracing::{debug, info};

use crate::error::{Error, Result};

use super::{
    make_full_host_name, make_full_service_name, service_type_equal, SubTypeList, TxtList,
};

/// Outcome delivered to publish/unpublish callbacks.
pub type PublishResult = Result<()>;

/// A move-only callback invoked at most once with the publish outcome.
///
/// Joined (coalesced) registrations chain callbacks so the combined one
/// invokes the originals in arrival order.
pub struct ResultCallback(Option<Box<dyn FnOnce(PublishResult)>>);

impl ResultCallback {
    pub fn new<F: FnOnce(PublishResult) + 'static>(callback: F) -> Self {
        Self(Some(Box::new(callback)))
    }

    /// A callback that does nothing; `is_null` reports true.
    pub fn null() -> Self {
        Self(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Consume the callback. Invoking a null callback is a no-op.
    pub fn invoke(mut self, result: PublishResult) {
        if let Some(callback) = self.0.take() {
            callback(result);
        }
    }

    /// Combine two callbacks; the result invokes `self` first, then `next`,
    /// with the same outcome.
    fn chain(self, next: ResultCallback) -> ResultCallback {
        ResultCallback::new(move |result: PublishResult| {
            self.invoke(result.clone());
            next.invoke(result);
        })
    }

    fn take(&mut self) -> ResultCallback {
        ResultCallback(self.0.take())
    }
}

impl std::fmt::Debug for ResultCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ResultCallback")
            .field(&self.0.is_some())
            .finish()
    }
}

/// Canonicalized parameters of a service registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceParams {
    /// Host the SRV record points at; empty anchors to the local host.
    pub host_name: String,
    pub instance_name: String,
    pub service_type: String,
    pub subtypes: SubTypeList,
    pub port: u16,
    pub txt: TxtList,
}

impl ServiceParams {
    /// Build with subtypes and TXT entries in canonical (sorted) order.
    pub fn canonical(
        host_name: &str,
        instance_name: &str,
        service_type: &str,
        subtypes: SubTypeList,
        port: u16,
        txt: TxtList,
    ) -> Self {
        Self {
            host_name: host_name.to_string(),
            instance_name: instance_name.to_string(),
            service_type: service_type.trim_end_matches('.').to_string(),
            subtypes: super::sort_subtype_list(subtypes),
            port,
            txt: super::sort_txt_list(txt),
        }
    }

    pub fn full_name(&self) -> String {
        make_full_service_name(&self.instance_name, &self.service_type)
    }
}

/// Parameters of a host registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostParams {
    pub host_name: String,
    pub address: Ipv6Addr,
}

impl HostParams {
    pub fn full_name(&self) -> String {
        make_full_host_name(&self.host_name)
    }
}

/// One tracked service registration.
struct ServiceRegistration {
    params: ServiceParams,
    callback: ResultCallback,
    completed: bool,
}

impl ServiceRegistration {
    fn new(params: ServiceParams, callback: ResultCallback) -> Self {
        Self {
            params,
            callback,
            completed: false,
        }
    }

    /// Mark the outcome and hand back the callback for invocation once the
    /// map borrow is released.
    fn complete(&mut self, result: &PublishResult) -> ResultCallback {
        if result.is_ok() {
            self.completed = true;
        }
        self.callback.take()
    }
}

impl Drop for ServiceRegistration {
    fn drop(&mut self) {
        let callback = self.callback.take();
        if !callback.is_null() {
            debug!(
                "aborting pending registration of {}",
                self.params.full_name()
            );
            callback.invoke(Err(Error::Aborted));
        }
    }
}

/// One tracked host registration.
struct HostRegistration {
    params: HostParams,
    callback: ResultCallback,
    completed: bool,
}

impl HostRegistration {
    fn new(params: HostParams, callback: ResultCallback) -> Self {
        Self {
            params,
            callback,
            completed: false,
        }
    }

    fn complete(&mut self, result: &PublishResult) -> ResultCallback {
        if result.is_ok() {
            self.completed = true;
        }
        self.callback.take()
    }
}

impl Drop for HostRegistration {
    fn drop(&mut self) {
        let callback = self.callback.take();
        if !callback.is_null() {
            debug!("aborting pending registration of {}", self.params.full_name());
            callback.invoke(Err(Error::Aborted));
        }
    }
}

#[derive(Default)]
struct LedgerInner {
    services: HashMap<String, ServiceRegistration>,
    hosts: HashMap<String, HostRegistration>,
}

/// Shared, queryable registration state. Cloning is cheap.
#[derive(Clone, Default)]
pub struct RegistrationLedger {
    inner: Rc<RefCell<LedgerInner>>,
}

enum DuplicateDecision {
    Absent,
    Outdated,
    Completed,
    Pending,
}

impl RegistrationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the duplicate-registration decision for a service publish.
    ///
    /// Returns the callback the caller must carry to the backend, or a null
    /// callback when the request was fully absorbed:
    /// - no existing registration: the callback is returned unchanged;
    /// - existing with different parameters: the old registration is removed
    ///   (its pending callback aborts) and the callback is returned;
    /// - existing, completed, identical: the callback fires with success
    ///   immediately, nothing to do against the backend;
    /// - existing, pending, identical: the callback is appended to the
    ///   pending registration's fan-out.
    pub(crate) fn prepare_service(
        &self,
        params: &ServiceParams,
        callback: ResultCallback,
    ) -> ResultCallback {
        let key = params.full_name();
        let decision = {
            let inner = self.inner.borrow();
            match inner.services.get(&key) {
                None => DuplicateDecision::Absent,
                Some(existing) if existing.params != *params => DuplicateDecision::Outdated,
                Some(existing) if existing.completed => DuplicateDecision::Completed,
                Some(_) => DuplicateDecision::Pending,
            }
        };
        match decision {
            DuplicateDecision::Absent => callback,
            DuplicateDecision::Outdated => {
                info!("replacing outdated registration of {}", key);
                let outdated = self.inner.borrow_mut().services.remove(&key);
                drop(outdated); // aborts the pending callback, borrow released
                callback
            }
            DuplicateDecision::Completed => {
                debug!("{} already registered with identical parameters", key);
                callback.invoke(Ok(()));
                ResultCallback::null()
            }
            DuplicateDecision::Pending => {
                debug!("joining pending registration of {}", key);
                let mut inner = self.inner.borrow_mut();
                if let Some(existing) = inner.services.get_mut(&key) {
                    let joined = existing.callback.take().chain(callback);
                    existing.callback = joined;
                }
                ResultCallback::null()
            }
        }
    }

    /// Same decision for host registrations.
    pub(crate) fn prepare_host(
        &self,
        params: &HostParams,
        callback: ResultCallback,
    ) -> ResultCallback {
        let key = params.full_name();
        let decision = {
            let inner = self.inner.borrow();
            match inner.hosts.get(&key) {
                None => DuplicateDecision::Absent,
                Some(existing) if existing.params != *params => DuplicateDecision::Outdated,
                Some(existing) if existing.completed => DuplicateDecision::Completed,
                Some(_) => DuplicateDecision::Pending,
            }
        };
        match decision {
            DuplicateDecision::Absent => callback,
            DuplicateDecision::Outdated => {
                info!("replacing outdated registration of {}", key);
                let outdated = self.inner.borrow_mut().hosts.remove(&key);
                drop(outdated);
                callback
            }
            DuplicateDecision::Completed => {
                debug!("{} already registered with identical parameters", key);
                callback.invoke(Ok(()));
                ResultCallback::null()
            }
            DuplicateDecision::Pending => {
                debug!("joining pending registration of {}", key);
                let mut inner = self.inner.borrow_mut();
                if let Some(existing) = inner.hosts.get_mut(&key) {
                    let joined = existing.callback.take().chain(callback);
                    existing.callback = joined;
                }
                ResultCallback::null()
            }
        }
    }

    /// Track a new pending service registration.
    pub(crate) fn add_service(&self, params: ServiceParams, callback: ResultCallback) {
        let key = params.full_name();
        let replaced = self
            .inner
            .borrow_mut()
            .services
            .insert(key, ServiceRegistration::new(params, callback));
        drop(replaced);
    }

    /// Track a new pending host registration.
    pub(crate) fn add_host(&self, params: HostParams, callback: ResultCallback) {
        let key = params.full_name();
        let replaced = self
            .inner
            .borrow_mut()
            .hosts
            .insert(key, HostRegistration::new(params, callback));
        drop(replaced);
    }

    /// Deliver the backend outcome for a service registration.
    ///
    /// `chosen_name` carries the instance name the backend settled on; when
    /// it differs from the requested one (auto-rename after a conflict) the
    /// registration is re-keyed. On an error outcome the registration is
    /// removed after the callback fires. Returns whether the registration
    /// was known.
    pub(crate) fn complete_service(
        &self,
        instance_name: &str,
        service_type: &str,
        chosen_name: Option<&str>,
        result: PublishResult,
    ) -> bool {
        let key = make_full_service_name(instance_name, service_type);
        let (callback, removed) = {
            let mut inner = self.inner.borrow_mut();
            let mut registration = match inner.services.remove(&key) {
                Some(registration) => registration,
                None => return false,
            };
            if let Some(name) = chosen_name {
                if name != registration.params.instance_name {
                    info!(
                        "service {} renamed to {}.{}",
                        key, name, registration.params.service_type
                    );
                    registration.params.instance_name = name.to_string();
                }
            }
            let callback = registration.complete(&result);
            if result.is_ok() {
                let new_key = registration.params.full_name();
                inner.services.insert(new_key, registration);
                (callback, None)
            } else {
                (callback, Some(registration))
            }
        };
        callback.invoke(result);
        drop(removed); // callback already taken; plain drop
        true
    }

    /// Deliver the backend outcome for a host registration.
    pub(crate) fn complete_host(&self, host_name: &str, result: PublishResult) -> bool {
        let key = make_full_host_name(host_name);
        let (callback, removed) = {
            let mut inner = self.inner.borrow_mut();
            let mut registration = match inner.hosts.remove(&key) {
                Some(registration) => registration,
                None => return false,
            };
            let callback = registration.complete(&result);
            if result.is_ok() {
                inner.hosts.insert(key, registration);
                (callback, None)
            } else {
                (callback, Some(registration))
            }
        };
        callback.invoke(result);
        drop(removed);
        true
    }

    /// Remove a service registration; a pending callback aborts.
    pub(crate) fn remove_service(
        &self,
        instance_name: &str,
        service_type: &str,
    ) -> Option<ServiceParams> {
        let key = make_full_service_name(instance_name, service_type);
        let removed = self.inner.borrow_mut().services.remove(&key);
        let params = removed.as_ref().map(|r| r.params.clone());
        drop(removed);
        params
    }

    /// Remove a host registration; a pending callback aborts.
    pub(crate) fn remove_host(&self, host_name: &str) -> Option<HostParams> {
        let key = make_full_host_name(host_name);
        let removed = self.inner.borrow_mut().hosts.remove(&key);
        let params = removed.as_ref().map(|r| r.params.clone());
        drop(removed);
        params
    }

    /// The completed registration for a service type, if any.
    pub fn find_service_by_type(&self, service_type: &str) -> Option<ServiceParams> {
        self.inner
            .borrow()
            .services
            .values()
            .find(|r| r.completed && service_type_equal(&r.params.service_type, service_type))
            .map(|r| r.params.clone())
    }

    /// Parameters of a tracked service registration, any state.
    pub fn find_service(&self, instance_name: &str, service_type: &str) -> Option<ServiceParams> {
        let key = make_full_service_name(instance_name, service_type);
        self.inner
            .borrow()
            .services
            .get(&key)
            .map(|r| r.params.clone())
    }

    /// Parameters of a tracked host registration, any state.
    pub fn find_host(&self, host_name: &str) -> Option<HostParams> {
        let key = make_full_host_name(host_name);
        self.inner.borrow().hosts.get(&key).map(|r| r.params.clone())
    }

    pub fn has_host(&self, host_name: &str) -> bool {
        self.find_host(host_name).is_some()
    }

    pub fn service_count(&self) -> usize {
        self.inner.borrow().services.len()
    }

    pub fn host_count(&self) -> usize {
        self.inner.borrow().hosts.len()
    }

    /// Drop every registration; pending callbacks abort.
    pub(crate) fn clear(&self) {
        let (services, hosts) = {
            let mut inner = self.inner.borrow_mut();
            (
                std::mem::take(&mut inner.services),
                std::mem::take(&mut inner.hosts),
            )
        };
        drop(services); // aborts outside the borrow
        drop(hosts);
    }
}
