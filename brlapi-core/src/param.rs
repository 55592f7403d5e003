//! C8: parameter engine (spec.md §3, §4.8).
//!
//! A parameter is identified by `(param, subparam)`, both `u64` on the
//! wire; PARAM_VALUE/PARAM_REQUEST/PARAM_UPDATE all share the fixed
//! 16-byte `(param, subparam)` header that `packet::PacketType::
//! min_payload_len` already reserves. Two bits of that header carry
//! flags the spec leaves as a single payload field but doesn't pin a
//! byte offset for (§9 open question): the top bit of `param` marks an
//! unsubscribe request, and the top bit of `subparam` marks `global`
//! (subscriber wants every change) vs `self` (subscriber wants to be
//! told only about changes it caused itself, i.e. an echo/confirmation).
//!
//! The concrete catalogue of parameter ids (display size, cursor style,
//! and so on) is owned by the external parameter table, out of scope
//! per spec.md §1; this module only implements the subscription and
//! change-notification mechanics plus a small descriptor registry any
//! given deployment fills in.

use crate::connection::ConnectionId;
use crate::error::{Error, ErrorCode};
use std::collections::HashMap;

pub type ParamId = u64;
pub type SubParamId = u64;

const UNSUBSCRIBE_BIT: u64 = 1 << 63;
const GLOBAL_BIT: u64 = 1 << 63;

/// Decoded `(param, subparam)` header shared by the three PARAM_* types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParamHeader {
    pub param: ParamId,
    pub subparam: SubParamId,
    pub unsubscribe: bool,
    pub global: bool,
}

impl ParamHeader {
    pub fn decode(raw_param: u64, raw_subparam: u64) -> Self {
        Self {
            param: raw_param & !UNSUBSCRIBE_BIT,
            subparam: raw_subparam & !GLOBAL_BIT,
            unsubscribe: raw_param & UNSUBSCRIBE_BIT != 0,
            global: raw_subparam & GLOBAL_BIT != 0,
        }
    }

    fn key(&self) -> (ParamId, SubParamId) {
        (self.param, self.subparam)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParamDescriptor {
    pub readonly: bool,
}

#[derive(Clone, Debug)]
struct Subscription {
    connection: ConnectionId,
    global: bool,
}

/// Global parameter state plus subscription tracking.
///
/// Mutex ordering note (spec.md §5): the parameter engine's lock is
/// always taken before the connection registry's lock, never after.
#[derive(Debug, Default)]
pub struct ParamTable {
    descriptors: HashMap<ParamId, ParamDescriptor>,
    values: HashMap<(ParamId, SubParamId), Vec<u8>>,
    subscriptions: HashMap<(ParamId, SubParamId), Vec<Subscription>>,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, param: ParamId, descriptor: ParamDescriptor) {
        self.descriptors.insert(param, descriptor);
    }

    pub fn seed_value(&mut self, param: ParamId, subparam: SubParamId, value: Vec<u8>) {
        self.values.insert((param, subparam), value);
    }

    pub fn get(&self, param: ParamId, subparam: SubParamId) -> Option<&[u8]> {
        self.values.get(&(param, subparam)).map(Vec::as_slice)
    }

    /// Handles a PARAM_REQUEST: subscribes (or unsubscribes) `connection`
    /// to change notifications for this `(param, subparam)`.
    pub fn request(&mut self, connection: ConnectionId, header: ParamHeader) {
        let key = header.key();
        let subs = self.subscriptions.entry(key).or_default();
        subs.retain(|s| s.connection != connection);
        if !header.unsubscribe {
            subs.push(Subscription {
                connection,
                global: header.global,
            });
        }
    }

    pub fn drop_connection(&mut self, connection: ConnectionId) {
        for subs in self.subscriptions.values_mut() {
            subs.retain(|s| s.connection != connection);
        }
    }

    /// Sets a parameter's value on behalf of `setter`, returning the
    /// connections that must receive a PARAM_UPDATE: every `global`
    /// subscriber, plus `setter` itself if it holds a `self` subscription.
    pub fn set(
        &mut self,
        setter: ConnectionId,
        param: ParamId,
        subparam: SubParamId,
        value: Vec<u8>,
    ) -> Result<Vec<ConnectionId>, Error> {
        if let Some(descriptor) = self.descriptors.get(&param) {
            if descriptor.readonly {
                return Err(Error::from(ErrorCode::ReadonlyParameter));
            }
        }
        self.values.insert((param, subparam), value);
        let notify = self
            .subscriptions
            .get(&(param, subparam))
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.global || s.connection == setter)
                    .map(|s| s.connection)
                    .collect()
            })
            .unwrap_or_default();
        Ok(notify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(n: u64) -> ConnectionId {
        ConnectionId::from_raw(n)
    }

    #[test]
    fn decode_unpacks_flag_bits() {
        let header = ParamHeader::decode(5 | UNSUBSCRIBE_BIT, 9 | GLOBAL_BIT);
        assert_eq!(header.param, 5);
        assert_eq!(header.subparam, 9);
        assert!(header.unsubscribe);
        assert!(header.global);
    }

    #[test]
    fn global_subscriber_sees_any_setter() {
        let mut table = ParamTable::new();
        table.request(
            conn(1),
            ParamHeader {
                param: 1,
                subparam: 0,
                unsubscribe: false,
                global: true,
            },
        );
        let notified = table.set(conn(2), 1, 0, vec![1]).unwrap();
        assert_eq!(notified, vec![conn(1)]);
    }

    #[test]
    fn self_subscriber_only_sees_its_own_change() {
        let mut table = ParamTable::new();
        table.request(
            conn(1),
            ParamHeader {
                param: 1,
                subparam: 0,
                unsubscribe: false,
                global: false,
            },
        );
        assert!(table.set(conn(2), 1, 0, vec![1]).unwrap().is_empty());
        assert_eq!(table.set(conn(1), 1, 0, vec![2]).unwrap(), vec![conn(1)]);
    }

    #[test]
    fn unsubscribe_removes_subscription() {
        let mut table = ParamTable::new();
        let sub = ParamHeader {
            param: 1,
            subparam: 0,
            unsubscribe: false,
            global: true,
        };
        table.request(conn(1), sub);
        table.request(
            conn(1),
            ParamHeader {
                unsubscribe: true,
                ..sub
            },
        );
        assert!(table.set(conn(2), 1, 0, vec![9]).unwrap().is_empty());
    }

    #[test]
    fn readonly_parameter_rejects_set() {
        let mut table = ParamTable::new();
        table.register(1, ParamDescriptor { readonly: true });
        let err = table.set(conn(1), 1, 0, vec![1]).unwrap_err();
        assert_eq!(err.as_wire_code(), ErrorCode::ReadonlyParameter);
    }

    #[test]
    fn drop_connection_clears_its_subscriptions() {
        let mut table = ParamTable::new();
        table.request(
            conn(1),
            ParamHeader {
                param: 1,
                subparam: 0,
                unsubscribe: false,
                global: true,
            },
        );
        table.drop_connection(conn(1));
        assert!(table.set(conn(2), 1, 0, vec![1]).unwrap().is_empty());
    }
}
