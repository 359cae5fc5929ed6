//! Author attribution for snapshot rendering.
//!
//! The CRDT only knows client ids and item ids; mapping those back to
//! human identities needs bookkeeping that survives in the document
//! itself. [`PermanentUserData`] keeps a shared `users` map: per user
//! name, the list of client ids that ever acted for that user and the
//! encoded delete sets of their transactions. Snapshot rendering resolves
//! `added` runs through the client-id list and `removed` runs through the
//! recorded delete sets.
//!
//! The structure is replicated like any other document data, so every
//! peer can attribute every author's insertions and deletions.

use std::sync::{Arc, Mutex};

use yrs::block::ID;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Any, Array, ArrayPrelim, ArrayRef, DeleteSet, Doc, Map, MapPrelim, MapRef, Out, ReadTxn, Transact, TransactionMut};

/// Name of the shared map holding user records.
const USERS_MAP_NAME: &str = "users";

const IDS_KEY: &str = "ids";
const DS_KEY: &str = "ds";

/// Durable user ↔ client-id bookkeeping on a document.
#[derive(Clone)]
pub struct PermanentUserData {
    users: MapRef,
    local_user: Arc<Mutex<Option<String>>>,
}

impl PermanentUserData {
    /// Attach to (or create) the shared `users` map of a document.
    pub fn new(doc: &Doc) -> Self {
        Self {
            users: doc.get_or_insert_map(USERS_MAP_NAME),
            local_user: Arc::new(Mutex::new(None)),
        }
    }

    /// Register `client_id` as acting for `name` and remember `name` as
    /// the local user for delete-set recording.
    pub fn set_user_mapping(&self, doc: &Doc, client_id: u64, name: &str) {
        let mut txn = doc.transact_mut();
        let user_map = self.user_entry(&mut txn, name);
        let ids = self.array_field(&mut txn, &user_map, IDS_KEY);
        let known = ids
            .iter(&txn)
            .any(|value| matches!(value, Out::Any(ref any) if any_is_client(any, client_id)));
        if !known {
            ids.push_back(&mut txn, Any::BigInt(client_id as i64));
        }
        *self.local_user.lock().unwrap() = Some(name.to_string());
    }

    /// Resolve the user that inserted with the given client id.
    pub fn user_by_client_id<T: ReadTxn>(&self, txn: &T, client_id: u64) -> Option<String> {
        for (name, value) in self.users.iter(txn) {
            let Out::YMap(user_map) = value else { continue };
            let Some(Out::YArray(ids)) = user_map.get(txn, IDS_KEY) else {
                continue;
            };
            let hit = ids
                .iter(txn)
                .any(|v| matches!(v, Out::Any(ref any) if any_is_client(any, client_id)));
            if hit {
                return Some(name.to_string());
            }
        }
        None
    }

    /// Resolve the user whose recorded delete sets cover the given id.
    pub fn user_by_deleted_id<T: ReadTxn>(&self, txn: &T, id: &ID) -> Option<String> {
        for (name, value) in self.users.iter(txn) {
            let Out::YMap(user_map) = value else { continue };
            let Some(Out::YArray(ds_list)) = user_map.get(txn, DS_KEY) else {
                continue;
            };
            for entry in ds_list.iter(txn) {
                let Out::Any(Any::Buffer(bytes)) = entry else {
                    continue;
                };
                if let Ok(ds) = DeleteSet::decode_v1(&bytes) {
                    if ds.is_deleted(id) {
                        return Some(name.to_string());
                    }
                }
            }
        }
        None
    }

    /// Record the deletions of an in-progress transaction against the
    /// local user. Called by the binding at the end of each local
    /// reconcile pass.
    pub(crate) fn record_delete_set(&self, txn: &mut TransactionMut) {
        let name = match self.local_user.lock().unwrap().clone() {
            Some(name) => name,
            None => return,
        };
        let ds = txn.delete_set().clone();
        if ds.is_empty() {
            return;
        }
        let encoded = ds.encode_v1();
        let user_map = self.user_entry(txn, &name);
        let ds_list = self.array_field(txn, &user_map, DS_KEY);
        ds_list.push_back(txn, Any::from(encoded));
    }

    fn user_entry(&self, txn: &mut TransactionMut, name: &str) -> MapRef {
        match self.users.get(txn, name) {
            Some(Out::YMap(existing)) => existing,
            _ => self.users.insert(txn, name, MapPrelim::default()),
        }
    }

    fn array_field(&self, txn: &mut TransactionMut, user_map: &MapRef, key: &str) -> ArrayRef {
        match user_map.get(txn, key) {
            Some(Out::YArray(existing)) => existing,
            _ => user_map.insert(txn, key, ArrayPrelim::default()),
        }
    }
}

fn any_is_client(any: &Any, client_id: u64) -> bool {
    match any {
        Any::BigInt(v) => *v as u64 == client_id,
        Any::Number(v) => *v as u64 == client_id,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use yrs::{XmlFragment, XmlElementPrelim};

    use super::*;
    use crate::binding::xml::branch_id_of;
    use yrs::branch::BranchID;

    #[test]
    fn test_user_by_client_id() {
        let doc = Doc::with_client_id(7);
        let pud = PermanentUserData::new(&doc);
        pud.set_user_mapping(&doc, 7, "alice");

        let txn = doc.transact();
        assert_eq!(pud.user_by_client_id(&txn, 7), Some("alice".to_string()));
        assert_eq!(pud.user_by_client_id(&txn, 8), None);
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let doc = Doc::with_client_id(7);
        let pud = PermanentUserData::new(&doc);
        pud.set_user_mapping(&doc, 7, "alice");
        pud.set_user_mapping(&doc, 7, "alice");

        let txn = doc.transact();
        let Some(Out::YMap(user)) = pud.users.get(&txn, "alice") else {
            panic!("user entry missing");
        };
        let Some(Out::YArray(ids)) = user.get(&txn, IDS_KEY) else {
            panic!("ids missing");
        };
        assert_eq!(ids.len(&txn), 1);
    }

    #[test]
    fn test_deleted_id_attribution() {
        let doc = Doc::with_client_id(7);
        let pud = PermanentUserData::new(&doc);
        pud.set_user_mapping(&doc, 7, "alice");

        let frag = doc.get_or_insert_xml_fragment("pm");
        let el = {
            let mut txn = doc.transact_mut();
            frag.insert(&mut txn, 0, XmlElementPrelim::empty("paragraph"))
        };
        let BranchID::Nested(el_id) = branch_id_of(&el) else {
            panic!("expected a nested branch id");
        };

        {
            let mut txn = doc.transact_mut();
            frag.remove_range(&mut txn, 0, 1);
            pud.record_delete_set(&mut txn);
        }

        let txn = doc.transact();
        assert_eq!(
            pud.user_by_deleted_id(&txn, &el_id),
            Some("alice".to_string())
        );
    }

    #[test]
    fn test_unrecorded_deletion_resolves_to_none() {
        let doc = Doc::with_client_id(7);
        let pud = PermanentUserData::new(&doc);
        let txn = doc.transact();
        assert_eq!(pud.user_by_deleted_id(&txn, &ID::new(1, 0)), None);
    }
}
