// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! mDNS service advertisement and discovery.
//!
//! The [`Publisher`] trait is the single abstraction the rest of the agent
//! talks to: publish/unpublish a service or host record, browse a service
//! type, resolve hosts, and receive discovery events through registered
//! subscription callbacks. Concrete backends live in submodules
//! ([`daemon`] drives an mDNS daemon client); the registration ledger with
//! its duplicate-registration coalescing is shared by every backend.

pub mod daemon;
pub mod registry;

#[cfg(test)]
pub(crate) mod mock;

use std::net::Ipv6Addr;
use std::rc::Rc;

use crate::error::{Error, Result};

pub use registry::{HostParams, PublishResult, RegistrationLedger, ResultCallback, ServiceParams};

/// mDNS domain every name lives under.
pub const MDNS_DOMAIN: &str = "local";

/// Maximum encoded size of a single TXT entry (RFC 6763 length byte minus
/// room for the length itself; longer entries are rejected as invalid).
pub const MAX_TXT_ENTRY_LEN: usize = 254;

/// One `name=value` TXT attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtEntry {
    pub name: String,
    pub value: Vec<u8>,
}

impl TxtEntry {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

pub type TxtList = Vec<TxtEntry>;
pub type SubTypeList = Vec<String>;

/// Sort a TXT list lexicographically by entry name (canonical order for
/// equality comparison and publication).
pub fn sort_txt_list(mut txt: TxtList) -> TxtList {
    txt.sort_by(|a, b| a.name.cmp(&b.name));
    txt
}

/// Sort a subtype list (canonical order).
pub fn sort_subtype_list(mut subtypes: SubTypeList) -> SubTypeList {
    subtypes.sort();
    subtypes
}

/// Encode a TXT list into the RFC 6763 length-prefixed wire form.
pub fn encode_txt_data(txt: &TxtList) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    for entry in txt {
        let entry_len = entry.name.len() + 1 + entry.value.len();
        if entry_len > MAX_TXT_ENTRY_LEN {
            return Err(Error::InvalidArgs(format!(
                "TXT entry '{}' is {} bytes",
                entry.name, entry_len
            )));
        }
        data.push(entry_len as u8);
        data.extend_from_slice(entry.name.as_bytes());
        data.push(b'=');
        data.extend_from_slice(&entry.value);
    }
    Ok(data)
}

/// Decode an RFC 6763 TXT record into a TXT list. Empty entries are
/// skipped; an entry without `=` is a boolean attribute with empty value.
pub fn decode_txt_data(data: &[u8]) -> Result<TxtList> {
    let mut txt = TxtList::new();
    let mut at = 0;
    while at < data.len() {
        let len = data[at] as usize;
        at += 1;
        if at + len > data.len() {
            return Err(Error::InvalidArgs("truncated TXT entry".into()));
        }
        let entry = &data[at..at + len];
        at += len;
        if entry.is_empty() {
            continue;
        }
        let (name, value) = match entry.iter().position(|&b| b == b'=') {
            Some(eq) => (&entry[..eq], entry[eq + 1..].to_vec()),
            None => (entry, Vec::new()),
        };
        let name = std::str::from_utf8(name)
            .map_err(|_| Error::InvalidArgs("non-UTF-8 TXT entry name".into()))?;
        txt.push(TxtEntry::new(name, value));
    }
    Ok(txt)
}

/// `<instance>.<type>.local`
pub fn make_full_service_name(instance_name: &str, service_type: &str) -> String {
    format!(
        "{}.{}.{}",
        instance_name,
        service_type.trim_end_matches('.'),
        MDNS_DOMAIN
    )
}

/// `<host>.local`
pub fn make_full_host_name(host_name: &str) -> String {
    format!("{}.{}", host_name, MDNS_DOMAIN)
}

/// Split a full service instance name (`inst._type._tcp.local[.]`) into
/// (instance, type). The instance label may itself contain no dots; the
/// first label is the instance.
pub fn split_full_service_name(full_name: &str) -> Option<(String, String)> {
    let trimmed = full_name.trim_end_matches('.');
    let trimmed = trimmed
        .strip_suffix(&format!(".{}", MDNS_DOMAIN))
        .unwrap_or(trimmed);
    let (instance, service_type) = trimmed.split_once('.')?;
    if instance.is_empty() || service_type.is_empty() {
        return None;
    }
    Some((instance.to_string(), service_type.to_string()))
}

/// Compare service types ignoring a trailing dot.
pub fn service_type_equal(first: &str, second: &str) -> bool {
    first.trim_end_matches('.') == second.trim_end_matches('.')
}

/// Publisher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not ready to publish.
    Idle,
    /// The backend is running and accepts registrations.
    Ready,
}

/// Invoked on every publisher state transition.
pub type StateCallback = Box<dyn FnMut(State)>;

/// A browsed-and-resolved service instance (or its removal).
#[derive(Debug, Clone, Default)]
pub struct DiscoveredInstanceInfo {
    pub name: String,
    pub host_name: String,
    pub port: u16,
    /// TXT record in RFC 6763 wire form.
    pub txt_data: Vec<u8>,
    pub addresses: Vec<Ipv6Addr>,
    pub ttl: u32,
    pub if_index: u32,
    /// Set when the instance announced a goodbye; the other fields besides
    /// `name` may then be empty.
    pub removed: bool,
}

/// A resolved host.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredHostInfo {
    pub host_name: String,
    pub addresses: Vec<Ipv6Addr>,
    pub ttl: u32,
}

/// Token identifying one installed pair of subscription callbacks.
/// Zero is never issued.
pub type SubscriberId = u64;

pub type InstanceCallback = Rc<dyn Fn(&str, &DiscoveredInstanceInfo)>;
pub type HostCallback = Rc<dyn Fn(&str, &DiscoveredHostInfo)>;

/// The mDNS publisher capability set, polymorphic over backends.
pub trait Publisher {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn is_started(&self) -> bool;

    /// Publish `instance_name.service_type.local`, optionally anchored to a
    /// previously published `host_name.local`. An empty instance name lets
    /// the backend choose (and possibly rename on conflict). The callback is
    /// invoked exactly once with the outcome.
    #[allow(clippy::too_many_arguments)]
    fn publish_service(
        &mut self,
        host_name: &str,
        instance_name: &str,
        service_type: &str,
        subtypes: SubTypeList,
        port: u16,
        txt: TxtList,
        callback: ResultCallback,
    );

    /// Remove a published service. The underlying teardown is best-effort;
    /// the callback reports success.
    fn unpublish_service(&mut self, instance_name: &str, service_type: &str, callback: ResultCallback);

    /// Publish an AAAA record binding `host_name.local` to `address`.
    fn publish_host(&mut self, host_name: &str, address: Ipv6Addr, callback: ResultCallback);

    fn unpublish_host(&mut self, host_name: &str, callback: ResultCallback);

    /// Browse `service_type` (empty instance name), or resolve one specific
    /// instance. Discovery hits are delivered to every installed instance
    /// callback.
    fn subscribe_service(&mut self, service_type: &str, instance_name: &str);

    fn unsubscribe_service(&mut self, service_type: &str, instance_name: &str);

    /// Resolve `host_name.local` to its addresses; deliveries go to every
    /// installed host callback.
    fn subscribe_host(&mut self, host_name: &str);

    fn unsubscribe_host(&mut self, host_name: &str);

    /// Install discovery callbacks. The returned id is non-zero and
    /// monotonically increasing.
    fn add_subscription_callbacks(
        &mut self,
        on_instance: Option<InstanceCallback>,
        on_host: Option<HostCallback>,
    ) -> SubscriberId;

    fn remove_subscription_callbacks(&mut self, id: SubscriberId);

    /// The completed registration for a service type, if any. After a
    /// backend auto-rename this carries the chosen instance name.
    fn find_service_registration_by_type(&self, service_type: &str) -> Option<ServiceParams>;

    /// Cheap cloneable view of the registration state, usable from inside
    /// result callbacks.
    fn ledger(&self) -> RegistrationLedger;
}

/// Installed subscription callbacks, shared by backends.
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: SubscriberId,
    entries: Vec<(SubscriberId, Option<InstanceCallback>, Option<HostCallback>)>,
}

impl Subscribers {
    pub(crate) fn add(
        &mut self,
        on_instance: Option<InstanceCallback>,
        on_host: Option<HostCallback>,
    ) -> SubscriberId {
        self.next_id += 1;
        self.entries.push((self.next_id, on_instance, on_host));
        self.next_id
    }

    pub(crate) fn remove(&mut self, id: SubscriberId) {
        self.entries.retain(|(entry_id, _, _)| *entry_id != id);
    }

    pub(crate) fn notify_instance(&self, service_type: &str, info: &DiscoveredInstanceInfo) {
        for (_, on_instance, _) in &self.entries {
            if let Some(callback) = on_instance {
                callback(service_type, info);
            }
        }
    }

    pub(crate) fn notify_host(&self, host_name: &str, info: &DiscoveredHostInfo) {
        for (_, _, on_host) in &self.entries {
            if let Some(callback) = on_host {
                callback(host_name, info);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_txt_roundtrip() {
        let txt = vec![
            TxtEntry::new("id", b"42".to_vec()),
            TxtEntry::new("seq", vec![0x01, 0x02]),
        ];
        let data = encode_txt_data(&txt).unwrap();
        assert_eq!(&data[..4], &[5, b'i', b'd', b'=']);
        assert_eq!(decode_txt_data(&data).unwrap(), txt);
    }

    #[test]
    fn test_txt_entry_without_value_decodes_as_boolean() {
        let txt = decode_txt_data(&[4, b'f', b'l', b'a', b'g']).unwrap();
        assert_eq!(txt, vec![TxtEntry::new("flag", Vec::new())]);
    }

    #[test]
    fn test_oversized_txt_entry_is_invalid() {
        let txt = vec![TxtEntry::new("big", vec![0u8; 260])];
        assert!(matches!(
            encode_txt_data(&txt),
            Err(Error::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_truncated_txt_is_invalid() {
        assert!(decode_txt_data(&[9, b'a', b'=', b'b']).is_err());
    }

    #[test]
    fn test_txt_sorting_is_by_name() {
        let txt = sort_txt_list(vec![
            TxtEntry::new("zz", b"1".to_vec()),
            TxtEntry::new("aa", b"2".to_vec()),
        ]);
        assert_eq!(txt[0].name, "aa");
        assert_eq!(txt[1].name, "zz");
    }

    #[test]
    fn test_full_name_helpers() {
        assert_eq!(
            make_full_service_name("srpl(1)", "_srpl-tls._tcp"),
            "srpl(1)._srpl-tls._tcp.local"
        );
        assert_eq!(make_full_host_name("router"), "router.local");
    }

    #[test]
    fn test_split_full_service_name() {
        let (instance, ty) =
            split_full_service_name("srpl(1)._srpl-tls._tcp.local.").unwrap();
        assert_eq!(instance, "srpl(1)");
        assert_eq!(ty, "_srpl-tls._tcp");

        let (instance, ty) = split_full_service_name("x._a._udp.local").unwrap();
        assert_eq!(instance, "x");
        assert_eq!(ty, "_a._udp");

        assert!(split_full_service_name("nolabels").is_none());
    }

    #[test]
    fn test_service_type_equality_ignores_trailing_dot() {
        assert!(service_type_equal("_srpl-tls._tcp", "_srpl-tls._tcp."));
        assert!(!service_type_equal("_srpl-tls._tcp", "_other._tcp"));
    }

    #[test]
    fn test_subscriber_ids_are_nonzero_and_increasing() {
        let mut subs = Subscribers::default();
        let first = subs.add(None, None);
        let second = subs.add(None, None);
        assert!(first > 0);
        assert!(second > first);
    }

    #[test]
    fn test_subscribers_fan_out_in_installation_order() {
        let seen: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));
        let mut subs = Subscribers::default();
        for tag in [1u32, 2, 3] {
            let seen = Rc::clone(&seen);
            subs.add(
                Some(Rc::new(move |_, _| seen.borrow_mut().push(tag))),
                None,
            );
        }
        subs.notify_instance("_srpl-tls._tcp", &DiscoveredInstanceInfo::default());
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_removed_subscriber_stops_receiving() {
        let count: Rc<RefCell<usize>> = Rc::new(RefCell::new(0));
        let mut subs = Subscribers::default();
        let counting = Rc::clone(&count);
        let id = subs.add(
            Some(Rc::new(move |_, _| *counting.borrow_mut() += 1)),
            None,
        );
        subs.notify_instance("t", &DiscoveredInstanceInfo::default());
        subs.remove(id);
        subs.notify_instance("t", &DiscoveredInstanceInfo::default());
        assert_eq!(*count.borrow(), 1);
    }
}
