//! Read/write interface over the byte-key store for instance vertices and
//! edges. A `DataGraph` is one transaction's view: a store snapshot plus its
//! own buffered writes, visible to its own reads before commit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::encoding::{
    edge_scan_prefix, instance_scan_prefix, thing_iid_len, EdgeIid, Infix, ThingEdge, ThingIid,
    ThingKind, TypeIid, TypeKind, Value,
};
use crate::error::{MotifError, Result};
use crate::graph::SchemaGraph;
use crate::storage::{Store, StoreSnapshot, WriteBatch};

/// Shared write-side state: the thing key generator and the per-attribute-type
/// upsert locks that uphold content-address uniqueness across transactions.
#[derive(Default)]
pub struct WriterRegistry {
    next_key: AtomicU64,
    upsert_locks: Mutex<FxHashMap<TypeIid, Arc<Mutex<()>>>>,
}

impl WriterRegistry {
    fn next_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn upsert_lock(&self, type_iid: TypeIid) -> Arc<Mutex<()>> {
        self.upsert_locks
            .lock()
            .entry(type_iid)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct DataGraph {
    schema: Arc<SchemaGraph>,
    store: Arc<dyn Store>,
    snapshot: Arc<dyn StoreSnapshot>,
    registry: Arc<WriterRegistry>,
    buffer: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    vertex_deltas: FxHashMap<TypeIid, i64>,
    has_deltas: FxHashMap<(TypeIid, TypeIid), i64>,
}

impl DataGraph {
    pub fn new(
        schema: Arc<SchemaGraph>,
        store: Arc<dyn Store>,
        registry: Arc<WriterRegistry>,
    ) -> Self {
        let snapshot = store.snapshot();
        Self {
            schema,
            store,
            snapshot,
            registry,
            buffer: BTreeMap::new(),
            vertex_deltas: FxHashMap::default(),
            has_deltas: FxHashMap::default(),
        }
    }

    pub fn schema(&self) -> &SchemaGraph {
        &self.schema
    }

    // ---- merged reads ----

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.buffer.get(key) {
            Some(Some(value)) => Some(value.clone()),
            Some(None) => None,
            None => self.snapshot.get(key),
        }
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = self
            .snapshot
            .scan_prefix(prefix)
            .into_iter()
            .map(|(key, value)| (key, Some(value)))
            .collect();
        for (key, value) in self
            .buffer
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            merged.insert(key.clone(), value.clone());
        }
        merged
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key, value)))
            .collect()
    }

    pub fn contains_vertex(&self, iid: &ThingIid) -> bool {
        self.get(iid.bytes()).is_some()
    }

    /// Instances of a type, optionally including all transitive subtypes.
    pub fn instances_of(&self, type_iid: TypeIid, transitive: bool) -> Result<Vec<ThingIid>> {
        let types = if transitive {
            self.schema.subtypes_transitive(type_iid)
        } else {
            vec![type_iid]
        };
        let mut out = Vec::new();
        for iid in types {
            let kind = match iid.kind() {
                TypeKind::Entity => ThingKind::Entity,
                TypeKind::Attribute => ThingKind::Attribute,
                TypeKind::Relation => ThingKind::Relation,
                TypeKind::Role => ThingKind::Role,
            };
            for (key, _) in self.scan_prefix(&instance_scan_prefix(kind, iid)) {
                // the instance prefix also covers edge keys rooted at these
                // vertices; a vertex key is exactly one thing IID long
                if thing_iid_len(&key) == Ok(key.len()) {
                    out.push(ThingIid::from_bytes(&key)?);
                }
            }
        }
        Ok(out)
    }

    /// Neighbours reached over edges with the given infix, in key order.
    pub fn neighbors(&self, from: &ThingIid, infix: Infix) -> Result<Vec<ThingIid>> {
        let mut out = Vec::new();
        for (key, _) in self.scan_prefix(&edge_scan_prefix(from, infix)) {
            out.push(EdgeIid::from_bytes(&key)?.end()?);
        }
        Ok(out)
    }

    /// Role-player neighbours filtered to the allowed role types. An empty
    /// filter admits every role.
    pub fn role_player_neighbors(
        &self,
        from: &ThingIid,
        infix: Infix,
        role_types: &[TypeIid],
    ) -> Result<Vec<(TypeIid, ThingIid)>> {
        let mut out = Vec::new();
        for (key, _) in self.scan_prefix(&edge_scan_prefix(from, infix)) {
            let edge = EdgeIid::from_bytes(&key)?;
            let role = edge.role_type()?;
            if role_types.is_empty() || role_types.contains(&role) {
                out.push((role, edge.end()?));
            }
        }
        Ok(out)
    }

    pub fn has_edge(&self, owner: &ThingIid, attribute: &ThingIid) -> bool {
        let key = EdgeIid::new(owner, ThingEdge::Has.forward(), attribute);
        self.get(key.bytes()).is_some()
    }

    // ---- writes ----

    fn check_writable(&self, type_iid: TypeIid, expected: TypeKind) -> Result<()> {
        if type_iid.kind() != expected {
            return Err(MotifError::IllegalState("type kind mismatch on insert"));
        }
        if self.schema.is_abstract(type_iid)? {
            return Err(MotifError::AbstractWrite(
                self.schema.label_of(type_iid)?.to_string(),
            ));
        }
        Ok(())
    }

    fn put_key(&mut self, key: Vec<u8>) {
        self.buffer.insert(key, Some(Vec::new()));
    }

    fn delete_key(&mut self, key: Vec<u8>) {
        self.buffer.insert(key, None);
    }

    pub fn insert_entity(&mut self, type_iid: TypeIid) -> Result<ThingIid> {
        self.check_writable(type_iid, TypeKind::Entity)?;
        let iid = ThingIid::object(ThingKind::Entity, type_iid, self.registry.next_key());
        self.put_key(iid.bytes().to_vec());
        *self.vertex_deltas.entry(type_iid).or_insert(0) += 1;
        Ok(iid)
    }

    pub fn insert_relation(&mut self, type_iid: TypeIid) -> Result<ThingIid> {
        self.check_writable(type_iid, TypeKind::Relation)?;
        let iid = ThingIid::object(ThingKind::Relation, type_iid, self.registry.next_key());
        self.put_key(iid.bytes().to_vec());
        *self.vertex_deltas.entry(type_iid).or_insert(0) += 1;
        Ok(iid)
    }

    /// Content-addressed upsert: the same typed value always resolves to the
    /// same IID and at most one persisted vertex.
    pub fn put_attribute(&mut self, type_iid: TypeIid, value: &Value) -> Result<ThingIid> {
        self.check_writable(type_iid, TypeKind::Attribute)?;
        let declared = self
            .schema
            .value_type_of(type_iid)?
            .ok_or(MotifError::IllegalState("attribute type without value kind"))?;
        if declared != value.value_type() {
            return Err(MotifError::AttributeValueCount(
                self.schema.label_of(type_iid)?.to_string(),
            ));
        }
        let iid = ThingIid::attribute(type_iid, value)?;
        let lock = self.registry.upsert_lock(type_iid);
        let _guard = lock.lock();
        if !self.contains_vertex(&iid) {
            self.put_key(iid.bytes().to_vec());
            *self.vertex_deltas.entry(type_iid).or_insert(0) += 1;
        }
        Ok(iid)
    }

    pub fn put_has(&mut self, owner: &ThingIid, attribute: &ThingIid) -> Result<()> {
        let owner_type = owner.type_iid();
        let attribute_type = attribute.type_iid();
        let ownable = self.schema.owned_attribute_types(owner_type);
        if !ownable
            .iter()
            .any(|iid| self.schema.is_subtype(attribute_type, *iid))
        {
            return Err(MotifError::IncompatibleOwns {
                owner: self.schema.label_of(owner_type)?.to_string(),
                attribute: self.schema.label_of(attribute_type)?.to_string(),
            });
        }
        let forward = EdgeIid::new(owner, ThingEdge::Has.forward(), attribute);
        if self.get(forward.bytes()).is_some() {
            return Ok(());
        }
        self.put_key(forward.bytes().to_vec());
        self.put_key(
            EdgeIid::new(attribute, ThingEdge::Has.backward(), owner)
                .bytes()
                .to_vec(),
        );
        *self
            .has_deltas
            .entry((owner_type, attribute_type))
            .or_insert(0) += 1;
        Ok(())
    }

    /// Attach `player` to `relation` under `role_type`, materialising the
    /// role instance vertex and its playing/relating/role-player edges.
    pub fn put_role_player(
        &mut self,
        relation: &ThingIid,
        role_type: TypeIid,
        player: &ThingIid,
    ) -> Result<()> {
        if role_type.kind() != TypeKind::Role {
            return Err(MotifError::IllegalState("role player requires a role type"));
        }
        let player_roles = self.schema.plays_of(player.type_iid())?;
        if !player_roles
            .iter()
            .any(|role| self.schema.is_subtype(role_type, *role))
        {
            return Err(MotifError::IncompatiblePlays {
                player: self.schema.label_of(player.type_iid())?.to_string(),
                role: self.schema.label_of(role_type)?.to_string(),
            });
        }
        let role = ThingIid::object(ThingKind::Role, role_type, self.registry.next_key());
        self.put_key(role.bytes().to_vec());
        *self.vertex_deltas.entry(role_type).or_insert(0) += 1;

        self.put_key(
            EdgeIid::new(relation, ThingEdge::Relating.forward(), &role)
                .bytes()
                .to_vec(),
        );
        self.put_key(
            EdgeIid::new(&role, ThingEdge::Relating.backward(), relation)
                .bytes()
                .to_vec(),
        );
        self.put_key(
            EdgeIid::new(player, ThingEdge::Playing.forward(), &role)
                .bytes()
                .to_vec(),
        );
        self.put_key(
            EdgeIid::new(&role, ThingEdge::Playing.backward(), player)
                .bytes()
                .to_vec(),
        );
        self.put_key(
            EdgeIid::role_player(relation, ThingEdge::RolePlayer.forward(), role_type, player)
                .bytes()
                .to_vec(),
        );
        self.put_key(
            EdgeIid::role_player(player, ThingEdge::RolePlayer.backward(), role_type, relation)
                .bytes()
                .to_vec(),
        );
        Ok(())
    }

    pub fn delete_has(&mut self, owner: &ThingIid, attribute: &ThingIid) -> Result<()> {
        let forward = EdgeIid::new(owner, ThingEdge::Has.forward(), attribute);
        if self.get(forward.bytes()).is_none() {
            return Ok(());
        }
        self.delete_key(forward.bytes().to_vec());
        self.delete_key(
            EdgeIid::new(attribute, ThingEdge::Has.backward(), owner)
                .bytes()
                .to_vec(),
        );
        *self
            .has_deltas
            .entry((owner.type_iid(), attribute.type_iid()))
            .or_insert(0) -= 1;
        Ok(())
    }

    /// Delete a thing vertex. Fails unless every incident edge is already
    /// deleted in this transaction's buffer.
    pub fn delete_thing(&mut self, iid: &ThingIid) -> Result<()> {
        const INFIXES: [Infix; 8] = [
            Infix::HasForward,
            Infix::HasBackward,
            Infix::PlayingForward,
            Infix::PlayingBackward,
            Infix::RelatingForward,
            Infix::RelatingBackward,
            Infix::RolePlayerForward,
            Infix::RolePlayerBackward,
        ];
        for infix in INFIXES {
            if !self.scan_prefix(&edge_scan_prefix(iid, infix)).is_empty() {
                return Err(MotifError::VertexHasEdges(format!("{iid:?}")));
            }
        }
        if self.get(iid.bytes()).is_some() {
            self.delete_key(iid.bytes().to_vec());
            *self.vertex_deltas.entry(iid.type_iid()).or_insert(0) -= 1;
        }
        Ok(())
    }

    /// Detach every role player of a relation, deleting the role vertices and
    /// all six edges each carries.
    pub fn delete_role_players(&mut self, relation: &ThingIid) -> Result<()> {
        let roles = self.neighbors(relation, Infix::RelatingForward)?;
        for role in roles {
            let players = self.neighbors(&role, Infix::PlayingBackward)?;
            for player in players {
                self.delete_key(
                    EdgeIid::new(&player, ThingEdge::Playing.forward(), &role)
                        .bytes()
                        .to_vec(),
                );
                self.delete_key(
                    EdgeIid::new(&role, ThingEdge::Playing.backward(), &player)
                        .bytes()
                        .to_vec(),
                );
                let role_type = role.type_iid();
                self.delete_key(
                    EdgeIid::role_player(relation, ThingEdge::RolePlayer.forward(), role_type, &player)
                        .bytes()
                        .to_vec(),
                );
                self.delete_key(
                    EdgeIid::role_player(&player, ThingEdge::RolePlayer.backward(), role_type, relation)
                        .bytes()
                        .to_vec(),
                );
            }
            self.delete_key(
                EdgeIid::new(relation, ThingEdge::Relating.forward(), &role)
                    .bytes()
                    .to_vec(),
            );
            self.delete_key(
                EdgeIid::new(&role, ThingEdge::Relating.backward(), relation)
                    .bytes()
                    .to_vec(),
            );
            self.delete_key(role.bytes().to_vec());
            *self.vertex_deltas.entry(role.type_iid()).or_insert(0) -= 1;
        }
        Ok(())
    }

    /// An inference overlay: shares this transaction's snapshot and sees its
    /// buffered writes, but its own writes are never committed and never
    /// touch statistics.
    pub fn fork_for_inference(&self) -> DataGraph {
        DataGraph {
            schema: self.schema.clone(),
            store: self.store.clone(),
            snapshot: self.snapshot.clone(),
            registry: self.registry.clone(),
            buffer: self.buffer.clone(),
            vertex_deltas: FxHashMap::default(),
            has_deltas: FxHashMap::default(),
        }
    }

    // ---- commit ----

    pub fn has_writes(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Apply the buffered writes atomically and publish statistic deltas.
    pub fn commit(mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        for (key, value) in std::mem::take(&mut self.buffer) {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        debug!(ops = batch.len(), "committing data graph batch");
        self.store.commit(batch)?;

        for (type_iid, delta) in self.vertex_deltas.drain() {
            match delta.cmp(&0) {
                std::cmp::Ordering::Greater => {
                    self.schema.record_vertex_created(type_iid, delta as u64)
                }
                std::cmp::Ordering::Less => {
                    self.schema.record_vertex_deleted(type_iid, (-delta) as u64)
                }
                std::cmp::Ordering::Equal => {}
            }
        }
        for ((owner, attribute), delta) in self.has_deltas.drain() {
            if delta != 0 {
                self.schema.record_has_edge(owner, attribute, delta);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::ValueType;
    use crate::storage::MemStore;

    fn fixture() -> (Arc<SchemaGraph>, Arc<MemStore>, Arc<WriterRegistry>) {
        (
            Arc::new(SchemaGraph::new()),
            Arc::new(MemStore::new()),
            Arc::new(WriterRegistry::default()),
        )
    }

    fn graph(
        schema: &Arc<SchemaGraph>,
        store: &Arc<MemStore>,
        registry: &Arc<WriterRegistry>,
    ) -> DataGraph {
        DataGraph::new(schema.clone(), store.clone() as Arc<dyn Store>, registry.clone())
    }

    #[test]
    fn attribute_upsert_is_idempotent() {
        let (schema, store, registry) = fixture();
        let name = schema
            .put_attribute_type("name", ValueType::String)
            .unwrap();

        let mut txn = graph(&schema, &store, &registry);
        let a = txn.put_attribute(name, &Value::String("foo".into())).unwrap();
        let b = txn.put_attribute(name, &Value::String("foo".into())).unwrap();
        assert_eq!(a, b);
        txn.commit().unwrap();

        let reader = graph(&schema, &store, &registry);
        assert_eq!(reader.instances_of(name, false).unwrap(), vec![a]);
        assert_eq!(schema.stats().instances_count(name), 1);
    }

    #[test]
    fn buffered_writes_visible_before_commit_invisible_outside() {
        let (schema, store, registry) = fixture();
        let person = schema.put_entity_type("person").unwrap();

        let mut txn = graph(&schema, &store, &registry);
        let alice = txn.insert_entity(person).unwrap();
        assert!(txn.contains_vertex(&alice));

        let other = graph(&schema, &store, &registry);
        assert!(!other.contains_vertex(&alice));

        txn.commit().unwrap();
        let after = graph(&schema, &store, &registry);
        assert!(after.contains_vertex(&alice));
    }

    #[test]
    fn has_edges_scan_both_directions() {
        let (schema, store, registry) = fixture();
        let person = schema.put_entity_type("person").unwrap();
        let name = schema
            .put_attribute_type("name", ValueType::String)
            .unwrap();
        schema.put_owns(person, name, false).unwrap();

        let mut txn = graph(&schema, &store, &registry);
        let alice = txn.insert_entity(person).unwrap();
        let value = txn.put_attribute(name, &Value::String("alice".into())).unwrap();
        txn.put_has(&alice, &value).unwrap();
        txn.commit().unwrap();

        let reader = graph(&schema, &store, &registry);
        assert_eq!(reader.neighbors(&alice, Infix::HasForward).unwrap(), vec![value.clone()]);
        assert_eq!(reader.neighbors(&value, Infix::HasBackward).unwrap(), vec![alice]);
    }

    #[test]
    fn role_players_connect_relation_and_player() {
        let (schema, store, registry) = fixture();
        let person = schema.put_entity_type("person").unwrap();
        let marriage = schema.put_relation_type("marriage").unwrap();
        let spouse = schema.put_relates(marriage, "spouse").unwrap();
        schema.put_plays(person, spouse).unwrap();

        let mut txn = graph(&schema, &store, &registry);
        let alice = txn.insert_entity(person).unwrap();
        let bob = txn.insert_entity(person).unwrap();
        let wedding = txn.insert_relation(marriage).unwrap();
        txn.put_role_player(&wedding, spouse, &alice).unwrap();
        txn.put_role_player(&wedding, spouse, &bob).unwrap();
        txn.commit().unwrap();

        let reader = graph(&schema, &store, &registry);
        let players = reader
            .role_player_neighbors(&wedding, Infix::RolePlayerForward, &[spouse])
            .unwrap();
        assert_eq!(players.len(), 2);
        let back = reader
            .role_player_neighbors(&alice, Infix::RolePlayerBackward, &[])
            .unwrap();
        assert_eq!(back, vec![(spouse, wedding)]);
    }

    #[test]
    fn delete_with_live_edges_is_rejected() {
        let (schema, store, registry) = fixture();
        let person = schema.put_entity_type("person").unwrap();
        let name = schema
            .put_attribute_type("name", ValueType::String)
            .unwrap();
        schema.put_owns(person, name, false).unwrap();

        let mut txn = graph(&schema, &store, &registry);
        let alice = txn.insert_entity(person).unwrap();
        let value = txn.put_attribute(name, &Value::String("alice".into())).unwrap();
        txn.put_has(&alice, &value).unwrap();
        txn.commit().unwrap();

        let mut deleter = graph(&schema, &store, &registry);
        let err = deleter.delete_thing(&alice).unwrap_err();
        assert!(matches!(err, MotifError::VertexHasEdges(_)));

        deleter.delete_has(&alice, &value).unwrap();
        deleter.delete_thing(&alice).unwrap();
        deleter.commit().unwrap();

        let reader = graph(&schema, &store, &registry);
        assert!(!reader.contains_vertex(&alice));
        assert_eq!(schema.stats().count_has_edges(&[person], &[name]), 0);
    }

    #[test]
    fn abstract_types_reject_writes() {
        let (schema, store, registry) = fixture();
        let person = schema.put_entity_type("person").unwrap();
        schema.set_abstract(person, true).unwrap();

        let mut txn = graph(&schema, &store, &registry);
        let err = txn.insert_entity(person).unwrap_err();
        assert!(matches!(err, MotifError::AbstractWrite(_)));
    }
}
