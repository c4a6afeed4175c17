// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon-client publisher backend.
//!
//! Drives an mDNS daemon through its command/event channels
//! ([`mdns_sd::ServiceDaemon`]). Registration completion, browse results and
//! hostname resolutions all arrive asynchronously; the channels are drained
//! non-blockingly from `process()` on an absolute-deadline timer that
//! `update()` folds into the shared mainloop timeout.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::time::{Duration, Instant};

use mdns_sd::{
    DaemonEvent, HostnameResolutionEvent, Receiver, ServiceDaemon, ServiceEvent, ServiceInfo,
    UnregisterStatus,
};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mainloop::{MainloopContext, MainloopProcessor};

use super::registry::{HostParams, RegistrationLedger, ResultCallback, ServiceParams};
use super::{
    encode_txt_data, make_full_host_name, make_full_service_name, split_full_service_name,
    DiscoveredHostInfo, DiscoveredInstanceInfo, HostCallback, InstanceCallback, Publisher, State,
    StateCallback, SubscriberId, Subscribers, TxtEntry,
};

/// Backend configuration.
#[derive(Debug, Clone)]
pub struct DaemonPublisherConfig {
    /// Prefix for the backend-chosen instance name when the caller leaves it
    /// empty.
    pub instance_prefix: String,

    /// How often the daemon channels are drained.
    pub poll_interval: Duration,
}

impl Default for DaemonPublisherConfig {
    fn default() -> Self {
        Self {
            instance_prefix: "srpl".into(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

struct ServiceSubscription {
    service_type: String,
    instance_name: String,
    receiver: Receiver<ServiceEvent>,
}

struct HostSubscription {
    host_name: String,
    receiver: Receiver<HostnameResolutionEvent>,
}

/// Publisher backed by the mDNS daemon client.
pub struct DaemonPublisher {
    config: DaemonPublisherConfig,
    daemon: Option<ServiceDaemon>,
    monitor: Option<Receiver<DaemonEvent>>,
    state: State,
    state_callback: StateCallback,
    ledger: RegistrationLedger,
    subscribers: Subscribers,
    service_subscriptions: Vec<ServiceSubscription>,
    host_subscriptions: Vec<HostSubscription>,
    /// Ledger key -> daemon fullname for registered services.
    service_handles: HashMap<String, String>,
    pending_unregisters: Vec<(String, Receiver<UnregisterStatus>)>,
    next_poll: Instant,
}

impl DaemonPublisher {
    pub fn new(config: DaemonPublisherConfig, state_callback: StateCallback) -> Self {
        Self {
            config,
            daemon: None,
            monitor: None,
            state: State::Idle,
            state_callback,
            ledger: RegistrationLedger::new(),
            subscribers: Subscribers::default(),
            service_subscriptions: Vec::new(),
            host_subscriptions: Vec::new(),
            service_handles: HashMap::new(),
            pending_unregisters: Vec::new(),
            next_poll: Instant::now(),
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            self.state = state;
            (self.state_callback)(state);
        }
    }

    fn choose_instance_name(&self) -> String {
        format!("{}-{}", self.config.instance_prefix, std::process::id())
    }

    fn type_domain(service_type: &str) -> String {
        format!("{}.local.", service_type.trim_end_matches('.'))
    }

    /// A daemon announce names the service as actually published; use it to
    /// complete the matching pending registration (the announced instance
    /// name may differ after a conflict rename).
    fn handle_announce(&mut self, fullname: &str) {
        let Some((announced_instance, _)) = split_full_service_name(fullname) else {
            return;
        };
        let matched = self
            .service_handles
            .iter()
            .find(|(_, registered)| registered.eq_ignore_ascii_case(fullname))
            .map(|(key, _)| key.clone());
        let Some(key) = matched else {
            return; // not one of ours
        };
        let Some((instance, service_type)) = split_full_service_name(&key) else {
            return;
        };
        if self
            .ledger
            .complete_service(&instance, &service_type, Some(&announced_instance), Ok(()))
            && announced_instance != instance
        {
            let fullname = fullname.to_string();
            self.service_handles.remove(&key);
            self.service_handles.insert(
                make_full_service_name(&announced_instance, &service_type),
                fullname,
            );
        }
    }

    fn drain_monitor(&mut self) {
        let Some(monitor) = self.monitor.as_ref() else {
            return;
        };
        let mut announced = Vec::new();
        loop {
            match monitor.try_recv() {
                Ok(DaemonEvent::Announce(fullname, origin)) => {
                    debug!("daemon announced {} via {}", fullname, origin);
                    announced.push(fullname);
                }
                Ok(DaemonEvent::Error(e)) => warn!("mDNS daemon error: {}", e),
                Ok(event) => debug!("daemon event: {:?}", event),
                Err(_) => break,
            }
        }
        for fullname in announced {
            self.handle_announce(&fullname);
        }
    }

    fn drain_service_subscriptions(&mut self) {
        let mut events: Vec<(String, DiscoveredInstanceInfo)> = Vec::new();
        for subscription in &self.service_subscriptions {
            loop {
                match subscription.receiver.try_recv() {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let Some(discovered) = discovered_instance(&info) else {
                            continue;
                        };
                        if !subscription.instance_name.is_empty()
                            && !discovered
                                .name
                                .eq_ignore_ascii_case(&subscription.instance_name)
                        {
                            continue;
                        }
                        info!(
                            "resolved {} ({} addresses)",
                            info.get_fullname(),
                            discovered.addresses.len()
                        );
                        events.push((subscription.service_type.clone(), discovered));
                    }
                    Ok(ServiceEvent::ServiceRemoved(_, fullname)) => {
                        let Some((instance, _)) = split_full_service_name(&fullname) else {
                            continue;
                        };
                        if !subscription.instance_name.is_empty()
                            && !instance.eq_ignore_ascii_case(&subscription.instance_name)
                        {
                            continue;
                        }
                        info!("instance {} said goodbye", fullname);
                        events.push((
                            subscription.service_type.clone(),
                            DiscoveredInstanceInfo {
                                name: instance,
                                removed: true,
                                ..DiscoveredInstanceInfo::default()
                            },
                        ));
                    }
                    Ok(event) => debug!("browse event: {:?}", event),
                    Err(_) => break,
                }
            }
        }
        for (service_type, info) in events {
            self.subscribers.notify_instance(&service_type, &info);
        }
    }

    fn drain_host_subscriptions(&mut self) {
        let mut events: Vec<(String, DiscoveredHostInfo)> = Vec::new();
        for subscription in &self.host_subscriptions {
            loop {
                match subscription.receiver.try_recv() {
                    Ok(HostnameResolutionEvent::AddressesFound(host, addresses)) => {
                        let addresses: Vec<Ipv6Addr> = addresses
                            .iter()
                            .filter_map(|addr| match addr {
                                IpAddr::V6(v6) => Some(*v6),
                                IpAddr::V4(_) => None,
                            })
                            .collect();
                        info!("resolved host {} ({} addresses)", host, addresses.len());
                        events.push((
                            subscription.host_name.clone(),
                            DiscoveredHostInfo {
                                host_name: host,
                                addresses,
                                // The daemon does not report the record TTL
                                // through this event.
                                ttl: 0,
                            },
                        ));
                    }
                    Ok(event) => debug!("hostname event: {:?}", event),
                    Err(_) => break,
                }
            }
        }
        for (host_name, info) in events {
            self.subscribers.notify_host(&host_name, &info);
        }
    }

    fn drain_unregisters(&mut self) {
        self.pending_unregisters.retain(|(fullname, receiver)| {
            if let Ok(status) = receiver.try_recv() {
                match status {
                    UnregisterStatus::OK => debug!("unregistered {}", fullname),
                    other => debug!("unregister of {}: {:?}", fullname, other),
                }
                return false;
            }
            !receiver.is_disconnected()
        });
    }
}

impl Publisher for DaemonPublisher {
    fn start(&mut self) -> Result<()> {
        if self.daemon.is_some() {
            return Ok(());
        }
        let daemon = ServiceDaemon::new().map_err(|e| Error::Mdns(e.to_string()))?;
        let monitor = daemon.monitor().map_err(|e| Error::Mdns(e.to_string()))?;
        self.daemon = Some(daemon);
        self.monitor = Some(monitor);
        self.next_poll = Instant::now();
        info!("mDNS daemon client started");
        self.set_state(State::Ready);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(daemon) = self.daemon.take() else {
            return;
        };
        self.ledger.clear();
        self.service_handles.clear();
        self.service_subscriptions.clear();
        self.host_subscriptions.clear();
        self.pending_unregisters.clear();
        self.monitor = None;
        if let Err(e) = daemon.shutdown() {
            debug!("daemon shutdown: {}", e);
        }
        info!("mDNS daemon client stopped");
        self.set_state(State::Idle);
    }

    fn is_started(&self) -> bool {
        self.state == State::Ready
    }

    fn publish_service(
        &mut self,
        host_name: &str,
        instance_name: &str,
        service_type: &str,
        subtypes: Vec<String>,
        port: u16,
        txt: Vec<TxtEntry>,
        callback: ResultCallback,
    ) {
        let Some(daemon) = self.daemon.as_ref() else {
            callback.invoke(Err(Error::InvalidState));
            return;
        };
        if !host_name.is_empty() && !self.ledger.has_host(host_name) {
            callback.invoke(Err(Error::InvalidArgs(format!(
                "host {} has not been published",
                host_name
            ))));
            return;
        }
        let instance = if instance_name.is_empty() {
            self.choose_instance_name()
        } else {
            instance_name.to_string()
        };
        let params =
            ServiceParams::canonical(host_name, &instance, service_type, subtypes, port, txt);

        let callback = self.ledger.prepare_service(&params, callback);
        if callback.is_null() {
            return;
        }
        if let Err(e) = encode_txt_data(&params.txt) {
            callback.invoke(Err(e));
            return;
        }
        if !params.subtypes.is_empty() {
            // The daemon client has no subtype surface; SRPL publishes none.
            warn!(
                "subtypes of {} are not announced by the daemon backend",
                params.full_name()
            );
        }

        let properties: HashMap<String, String> = params
            .txt
            .iter()
            .map(|entry| {
                (
                    entry.name.clone(),
                    String::from_utf8_lossy(&entry.value).into_owned(),
                )
            })
            .collect();
        let anchored = self.ledger.find_host(&params.host_name);
        let host_full = if params.host_name.is_empty() {
            format!("{}.local.", instance)
        } else {
            format!("{}.local.", params.host_name)
        };
        let info = match anchored {
            Some(host) => ServiceInfo::new(
                &Self::type_domain(service_type),
                &instance,
                &host_full,
                IpAddr::V6(host.address),
                port,
                properties,
            ),
            None => ServiceInfo::new(
                &Self::type_domain(service_type),
                &instance,
                &host_full,
                (),
                port,
                properties,
            )
            .map(|info| info.enable_addr_auto()),
        };
        let info = match info {
            Ok(info) => info,
            Err(e) => {
                callback.invoke(Err(Error::Mdns(e.to_string())));
                return;
            }
        };
        let fullname = info.get_fullname().to_string();

        if let Err(e) = daemon.register(info) {
            warn!("failed to register {}: {}", fullname, e);
            callback.invoke(Err(Error::Mdns(e.to_string())));
            return;
        }
        info!("publishing service {}", fullname);
        self.service_handles.insert(params.full_name(), fullname);
        self.ledger.add_service(params, callback);
    }

    fn unpublish_service(
        &mut self,
        instance_name: &str,
        service_type: &str,
        callback: ResultCallback,
    ) {
        if let Some(params) = self.ledger.remove_service(instance_name, service_type) {
            info!("removing service {}", params.full_name());
            if let Some(fullname) = self.service_handles.remove(&params.full_name()) {
                if let Some(daemon) = self.daemon.as_ref() {
                    match daemon.unregister(&fullname) {
                        Ok(receiver) => self.pending_unregisters.push((fullname, receiver)),
                        Err(e) => debug!("unregister of {}: {}", fullname, e),
                    }
                }
            }
        }
        // Teardown is best-effort; the record is gone from our perspective.
        callback.invoke(Ok(()));
    }

    fn publish_host(&mut self, host_name: &str, address: Ipv6Addr, callback: ResultCallback) {
        if !self.is_started() {
            callback.invoke(Err(Error::InvalidState));
            return;
        }
        let params = HostParams {
            host_name: host_name.to_string(),
            address,
        };
        let callback = self.ledger.prepare_host(&params, callback);
        if callback.is_null() {
            return;
        }
        info!("publishing host {}", params.full_name());
        self.ledger.add_host(params, callback);
        // The daemon announces the address records together with each
        // service anchored to this host; there is no standalone record to
        // wait for.
        self.ledger.complete_host(host_name, Ok(()));
    }

    fn unpublish_host(&mut self, host_name: &str, callback: ResultCallback) {
        if self.ledger.remove_host(host_name).is_some() {
            info!("removing host {}", make_full_host_name(host_name));
        }
        callback.invoke(Ok(()));
    }

    fn subscribe_service(&mut self, service_type: &str, instance_name: &str) {
        let Some(daemon) = self.daemon.as_ref() else {
            warn!("subscribe before the publisher is started");
            return;
        };
        let type_domain = Self::type_domain(service_type);
        match daemon.browse(&type_domain) {
            Ok(receiver) => {
                info!(
                    "subscribed to {} (instance '{}', total {})",
                    service_type,
                    instance_name,
                    self.service_subscriptions.len() + 1
                );
                self.service_subscriptions.push(ServiceSubscription {
                    service_type: service_type.trim_end_matches('.').to_string(),
                    instance_name: instance_name.to_string(),
                    receiver,
                });
            }
            Err(e) => warn!("failed to browse {}: {}", type_domain, e),
        }
    }

    fn unsubscribe_service(&mut self, service_type: &str, instance_name: &str) {
        let normalized = service_type.trim_end_matches('.');
        let position = self.service_subscriptions.iter().position(|s| {
            s.service_type == normalized && s.instance_name == instance_name
        });
        let Some(position) = position else {
            debug!("unsubscribe without a matching subscription: {}", service_type);
            return;
        };
        self.service_subscriptions.remove(position);
        let still_browsing = self
            .service_subscriptions
            .iter()
            .any(|s| s.service_type == normalized);
        if !still_browsing {
            if let Some(daemon) = self.daemon.as_ref() {
                if let Err(e) = daemon.stop_browse(&Self::type_domain(service_type)) {
                    debug!("stop_browse of {}: {}", service_type, e);
                }
            }
        }
        info!(
            "unsubscribed from {} (left {})",
            service_type,
            self.service_subscriptions.len()
        );
    }

    fn subscribe_host(&mut self, host_name: &str) {
        let Some(daemon) = self.daemon.as_ref() else {
            warn!("subscribe before the publisher is started");
            return;
        };
        let full = format!("{}.local.", host_name);
        match daemon.resolve_hostname(&full, None) {
            Ok(receiver) => {
                info!("subscribed to host {}", host_name);
                self.host_subscriptions.push(HostSubscription {
                    host_name: host_name.to_string(),
                    receiver,
                });
            }
            Err(e) => warn!("failed to resolve host {}: {}", full, e),
        }
    }

    fn unsubscribe_host(&mut self, host_name: &str) {
        // Dropping the receiver releases any in-flight resolve on our side;
        // the daemon's query ages out on its own.
        self.host_subscriptions.retain(|s| s.host_name != host_name);
        info!("unsubscribed from host {}", host_name);
    }

    fn add_subscription_callbacks(
        &mut self,
        on_instance: Option<InstanceCallback>,
        on_host: Option<HostCallback>,
    ) -> SubscriberId {
        self.subscribers.add(on_instance, on_host)
    }

    fn remove_subscription_callbacks(&mut self, id: SubscriberId) {
        self.subscribers.remove(id);
    }

    fn find_service_registration_by_type(&self, service_type: &str) -> Option<ServiceParams> {
        self.ledger.find_service_by_type(service_type)
    }

    fn ledger(&self) -> RegistrationLedger {
        self.ledger.clone()
    }
}

impl MainloopProcessor for DaemonPublisher {
    fn update(&mut self, ctx: &mut MainloopContext) {
        if self.is_started() {
            // The daemon client is channel-based; wake on the next drain
            // deadline rather than on an fd.
            ctx.lower_timeout_until(self.next_poll);
        }
    }

    fn process(&mut self, _ctx: &MainloopContext) {
        if !self.is_started() {
            return;
        }
        let now = Instant::now();
        if now < self.next_poll {
            return;
        }
        self.next_poll = now + self.config.poll_interval;
        self.drain_monitor();
        self.drain_service_subscriptions();
        self.drain_host_subscriptions();
        self.drain_unregisters();
    }
}

impl Drop for DaemonPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Translate a resolved daemon service into the discovery record the
/// subscription callbacks consume. IPv4 addresses are filtered out.
fn discovered_instance(info: &ServiceInfo) -> Option<DiscoveredInstanceInfo> {
    let (name, _) = split_full_service_name(info.get_fullname())?;
    let addresses: Vec<Ipv6Addr> = info
        .get_addresses()
        .iter()
        .filter_map(|addr| match addr {
            IpAddr::V6(v6) => Some(*v6),
            IpAddr::V4(_) => None,
        })
        .collect();
    let txt: Vec<TxtEntry> = info
        .get_properties()
        .iter()
        .map(|property| {
            TxtEntry::new(
                property.key(),
                property.val().map(|v| v.to_vec()).unwrap_or_default(),
            )
        })
        .collect();
    let txt_data = encode_txt_data(&super::sort_txt_list(txt)).unwrap_or_default();
    Some(DiscoveredInstanceInfo {
        name,
        host_name: info.get_hostname().to_string(),
        port: info.get_port(),
        txt_data,
        addresses,
        ttl: info.get_host_ttl(),
        if_index: 0,
        removed: false,
    })
}
