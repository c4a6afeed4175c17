// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SRPL DNS-SD controller.
//!
//! Drives the mDNS publisher on behalf of the SRP Replication engine:
//! publishes the local `_srpl-tls._tcp` instance (letting the backend pick
//! and possibly rename the instance name), browses for remote peers, and
//! translates resolved instances into peer-info records for the engine.
//!
//! The publisher is an injected collaborator passed into each call; result
//! callbacks only capture the cloneable registration ledger, never the
//! publisher itself.

use std::cell::RefCell;
use std::net::SocketAddrV6;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::mdns::{
    decode_txt_data, DiscoveredInstanceInfo, InstanceCallback, Publisher, ResultCallback,
    SubscriberId,
};

/// DNS-SD service type SRPL peers advertise under.
pub const SRPL_SERVICE_TYPE: &str = "_srpl-tls._tcp";

/// Port SRPL peers listen on.
pub const SRPL_PORT: u16 = 853;

/// A discovered (or withdrawn) replication peer.
#[derive(Debug, Clone, Default)]
pub struct PeerInfo {
    /// The peer's record announced a goodbye; the other fields are empty.
    pub removed: bool,
    /// Socket address of the peer's DSO listener.
    pub sock_addr: Option<SocketAddrV6>,
    /// The peer's TXT record in wire form.
    pub txt_data: Vec<u8>,
}

/// Consumer of peer discovery events (the SRP Replication engine).
pub trait ReplicationEngine {
    fn handle_peer_event(&self, peer: &PeerInfo);
}

#[derive(Default)]
struct SrplShared {
    /// Backend-chosen instance name of our own advertisement; used to
    /// suppress self-discovery.
    instance_name: Option<String>,
    /// Non-zero while browsing.
    subscriber_id: SubscriberId,
}

/// The SRPL DNS-SD controller.
pub struct SrplDnssd {
    engine: Rc<dyn ReplicationEngine>,
    shared: Rc<RefCell<SrplShared>>,
}

impl SrplDnssd {
    pub fn new(engine: Rc<dyn ReplicationEngine>) -> Self {
        Self {
            engine,
            shared: Rc::new(RefCell::new(SrplShared::default())),
        }
    }

    pub fn is_browsing(&self) -> bool {
        self.shared.borrow().subscriber_id != 0
    }

    /// The cached instance name of our own advertisement, once known.
    pub fn service_instance_name(&self) -> Option<String> {
        self.shared.borrow().instance_name.clone()
    }

    /// Start browsing for SRPL peers. Idempotent.
    pub fn start_browse(&mut self, publisher: &mut dyn Publisher) {
        if self.is_browsing() {
            return;
        }
        let shared = Rc::clone(&self.shared);
        let engine = Rc::clone(&self.engine);
        let on_instance: InstanceCallback = Rc::new(move |service_type, info| {
            Self::on_instance_resolved(&shared, engine.as_ref(), service_type, info);
        });
        let id = publisher.add_subscription_callbacks(Some(on_instance), None);
        self.shared.borrow_mut().subscriber_id = id;
        publisher.subscribe_service(SRPL_SERVICE_TYPE, "");
        info!("started browsing for SRPL peers");
    }

    /// Stop browsing. A no-op when not browsing.
    pub fn stop_browse(&mut self, publisher: &mut dyn Publisher) {
        let id = self.shared.borrow().subscriber_id;
        if id == 0 {
            return;
        }
        publisher.unsubscribe_service(SRPL_SERVICE_TYPE, "");
        publisher.remove_subscription_callbacks(id);
        self.shared.borrow_mut().subscriber_id = 0;
        info!("stopped browsing for SRPL peers");
    }

    /// Publish the local SRPL service with the given TXT record. The
    /// backend chooses the instance name; once the registration completes
    /// the chosen (possibly renamed) name is cached for self-suppression.
    pub fn register_service(&mut self, publisher: &mut dyn Publisher, txt_data: &[u8]) {
        let txt = match decode_txt_data(txt_data) {
            Ok(txt) => txt,
            Err(e) => {
                warn!("malformed SRPL TXT data: {}", e);
                return;
            }
        };
        info!("publishing SRPL service");
        let ledger = publisher.ledger();
        let shared = Rc::clone(&self.shared);
        publisher.publish_service(
            "",
            "",
            SRPL_SERVICE_TYPE,
            Vec::new(),
            SRPL_PORT,
            txt,
            ResultCallback::new(move |result| match result {
                Ok(()) => {
                    if let Some(params) = ledger.find_service_by_type(SRPL_SERVICE_TYPE) {
                        info!("SRPL service instance name is {}", params.instance_name);
                        shared.borrow_mut().instance_name = Some(params.instance_name);
                    }
                }
                Err(e) => warn!("failed to publish SRPL service: {}", e),
            }),
        );
    }

    /// Withdraw the local SRPL service.
    pub fn unregister_service(&mut self, publisher: &mut dyn Publisher) {
        let Some(name) = self.shared.borrow().instance_name.clone() else {
            debug!("no SRPL service instance to unpublish");
            return;
        };
        info!("unpublishing SRPL service: {}", name);
        let shared = Rc::clone(&self.shared);
        publisher.unpublish_service(
            &name,
            SRPL_SERVICE_TYPE,
            ResultCallback::new(move |result| {
                if result.is_ok() {
                    shared.borrow_mut().instance_name = None;
                }
            }),
        );
    }

    fn on_instance_resolved(
        shared: &RefCell<SrplShared>,
        engine: &dyn ReplicationEngine,
        service_type: &str,
        info: &DiscoveredInstanceInfo,
    ) {
        {
            let state = shared.borrow();
            if state.subscriber_id == 0 {
                return;
            }
            if !service_type
                .trim_end_matches('.')
                .eq_ignore_ascii_case(SRPL_SERVICE_TYPE)
            {
                return;
            }
            if let Some(own) = &state.instance_name {
                if own.eq_ignore_ascii_case(&info.name) {
                    debug!("ignoring own SRPL instance {}", info.name);
                    return;
                }
            }
        }

        let mut peer = PeerInfo {
            removed: info.removed,
            ..PeerInfo::default()
        };
        info!("discovered SRPL peer: {}", info.name);
        if !info.removed {
            let Some(address) = info.addresses.first() else {
                return;
            };
            peer.sock_addr = Some(SocketAddrV6::new(*address, info.port, 0, 0));
            peer.txt_data = info.txt_data.clone();
        }
        engine.handle_peer_event(&peer);
    }
}
