// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scriptable in-memory publisher for tests.
//!
//! Records every backend interaction and lets a test drive registration
//! completion and discovery events by hand, exercising the same ledger and
//! fan-out paths as a real backend.

use std::net::Ipv6Addr;

use crate::error::Error;

use super::registry::{HostParams, RegistrationLedger, ResultCallback, ServiceParams};
use super::{
    encode_txt_data, DiscoveredHostInfo, DiscoveredInstanceInfo, HostCallback, InstanceCallback,
    Publisher, PublishResult, SubTypeList, SubscriberId, Subscribers, TxtList,
};

pub(crate) struct MockPublisher {
    pub started: bool,
    /// Instance name the "backend" chooses when the caller leaves it empty.
    pub default_instance: String,
    pub register_calls: Vec<ServiceParams>,
    pub subscribe_calls: Vec<(String, String)>,
    pub unsubscribe_calls: Vec<(String, String)>,
    #[allow(dead_code)]
    pub host_subscribe_calls: Vec<String>,
    ledger: RegistrationLedger,
    subscribers: Subscribers,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self {
            started: true,
            default_instance: "mock".into(),
            register_calls: Vec::new(),
            subscribe_calls: Vec::new(),
            unsubscribe_calls: Vec::new(),
            host_subscribe_calls: Vec::new(),
            ledger: RegistrationLedger::new(),
            subscribers: Subscribers::default(),
        }
    }

    /// Deliver the backend outcome for a pending service registration.
    pub fn complete_service(
        &self,
        instance_name: &str,
        service_type: &str,
        chosen_name: Option<&str>,
        result: PublishResult,
    ) -> bool {
        self.ledger
            .complete_service(instance_name, service_type, chosen_name, result)
    }

    /// Feed a resolved (or removed) instance to the installed callbacks.
    pub fn resolve_instance(&self, service_type: &str, info: &DiscoveredInstanceInfo) {
        self.subscribers.notify_instance(service_type, info);
    }

    #[allow(dead_code)]
    pub fn resolve_host(&self, host_name: &str, info: &DiscoveredHostInfo) {
        self.subscribers.notify_host(host_name, info);
    }
}

impl Publisher for MockPublisher {
    fn start(&mut self) -> crate::error::Result<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
        self.ledger.clear();
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn publish_service(
        &mut self,
        host_name: &str,
        instance_name: &str,
        service_type: &str,
        subtypes: SubTypeList,
        port: u16,
        txt: TxtList,
        callback: ResultCallback,
    ) {
        if !self.started {
            callback.invoke(Err(Error::InvalidState));
            return;
        }
        let instance = if instance_name.is_empty() {
            self.default_instance.clone()
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
        self.register_calls.push(params.clone());
        self.ledger.add_service(params, callback);
    }

    fn unpublish_service(
        &mut self,
        instance_name: &str,
        service_type: &str,
        callback: ResultCallback,
    ) {
        self.ledger.remove_service(instance_name, service_type);
        callback.invoke(Ok(()));
    }

    fn publish_host(&mut self, host_name: &str, address: Ipv6Addr, callback: ResultCallback) {
        if !self.started {
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
        self.ledger.add_host(params, callback);
    }

    fn unpublish_host(&mut self, host_name: &str, callback: ResultCallback) {
        self.ledger.remove_host(host_name);
        callback.invoke(Ok(()));
    }

    fn subscribe_service(&mut self, service_type: &str, instance_name: &str) {
        self.subscribe_calls
            .push((service_type.to_string(), instance_name.to_string()));
    }

    fn unsubscribe_service(&mut self, service_type: &str, instance_name: &str) {
        self.unsubscribe_calls
            .push((service_type.to_string(), instance_name.to_string()));
    }

    fn subscribe_host(&mut self, host_name: &str) {
        self.host_subscribe_calls.push(host_name.to_string());
    }

    fn unsubscribe_host(&mut self, _host_name: &str) {}

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

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Two identical publishes while pending: the backend sees one register
    /// call, both callbacks fire in order with the single outcome.
    #[test]
    fn test_duplicate_service_collapse_hits_backend_once() {
        let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));
        let mut publisher = MockPublisher::new();

        for tag in [1u32, 2] {
            let order = Rc::clone(&order);
            publisher.publish_service(
                "",
                "peer",
                "_srpl-tls._tcp",
                Vec::new(),
                853,
                Vec::new(),
                ResultCallback::new(move |result| {
                    assert!(result.is_ok());
                    order.borrow_mut().push(tag);
                }),
            );
        }
        assert_eq!(publisher.register_calls.len(), 1);

        publisher.complete_service("peer", "_srpl-tls._tcp", None, Ok(()));
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    /// Changed parameters on the same key: old callback aborts, new request
    /// reaches the backend.
    #[test]
    fn test_changed_parameters_reach_backend_after_abort() {
        let outcomes: Rc<RefCell<Vec<PublishResult>>> = Rc::new(RefCell::new(Vec::new()));
        let mut publisher = MockPublisher::new();

        for port in [853u16, 854] {
            let outcomes = Rc::clone(&outcomes);
            publisher.publish_service(
                "",
                "peer",
                "_srpl-tls._tcp",
                Vec::new(),
                port,
                Vec::new(),
                ResultCallback::new(move |result| outcomes.borrow_mut().push(result)),
            );
        }
        assert_eq!(publisher.register_calls.len(), 2);
        assert_eq!(*outcomes.borrow(), vec![Err(Error::Aborted)]);

        publisher.complete_service("peer", "_srpl-tls._tcp", None, Ok(()));
        assert_eq!(*outcomes.borrow(), vec![Err(Error::Aborted), Ok(())]);
    }

    /// Completed-then-identical: second callback fires immediately, backend
    /// is not re-invoked.
    #[test]
    fn test_completed_identical_does_not_touch_backend() {
        let hits: Rc<RefCell<usize>> = Rc::new(RefCell::new(0));
        let mut publisher = MockPublisher::new();

        publisher.publish_service(
            "",
            "peer",
            "_srpl-tls._tcp",
            Vec::new(),
            853,
            Vec::new(),
            ResultCallback::new(|_| {}),
        );
        publisher.complete_service("peer", "_srpl-tls._tcp", None, Ok(()));
        assert_eq!(publisher.register_calls.len(), 1);

        let counting = Rc::clone(&hits);
        publisher.publish_service(
            "",
            "peer",
            "_srpl-tls._tcp",
            Vec::new(),
            853,
            Vec::new(),
            ResultCallback::new(move |result| {
                assert!(result.is_ok());
                *counting.borrow_mut() += 1;
            }),
        );
        assert_eq!(publisher.register_calls.len(), 1);
        assert_eq!(*hits.borrow(), 1);
    }
}
