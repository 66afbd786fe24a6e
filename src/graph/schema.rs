//! In-memory cache of the type hierarchy and its statistics. Writers mutate
//! under schema transactions; readers go through short read locks and use the
//! monotone snapshot counter to detect drift without holding anything.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::encoding::{TypeIid, TypeKind, ValueType};
use crate::error::{MotifError, Result};
use crate::graph::Label;

#[derive(Clone, Debug)]
struct TypeDef {
    iid: TypeIid,
    label: Label,
    parent: Option<TypeIid>,
    is_root: bool,
    is_abstract: bool,
    value_type: Option<ValueType>,
    regex: Option<String>,
    owns: Vec<(TypeIid, bool)>,
    plays: Vec<TypeIid>,
    relates: Vec<TypeIid>,
}

#[derive(Default)]
struct SchemaInner {
    types: FxHashMap<TypeIid, TypeDef>,
    label_index: FxHashMap<Vec<u8>, TypeIid>,
    next_key: FxHashMap<TypeKind, u16>,
}

impl SchemaInner {
    fn allocate(&mut self, kind: TypeKind) -> TypeIid {
        let key = self.next_key.entry(kind).or_insert(0);
        let iid = TypeIid::new(kind, *key);
        *key += 1;
        iid
    }

    fn def(&self, iid: TypeIid) -> Result<&TypeDef> {
        self.types
            .get(&iid)
            .ok_or(MotifError::IllegalState("type iid not registered"))
    }

    fn resolve(&self, label: &Label) -> Result<TypeIid> {
        self.label_index
            .get(&label.index_key())
            .copied()
            .ok_or_else(|| MotifError::UnknownLabel(label.to_string()))
    }

    fn insert(&mut self, def: TypeDef) -> TypeIid {
        let iid = def.iid;
        self.label_index.insert(def.label.index_key(), iid);
        self.types.insert(iid, def);
        iid
    }

    fn subtypes_direct(&self, iid: TypeIid) -> Vec<TypeIid> {
        self.types
            .values()
            .filter(|def| def.parent == Some(iid))
            .map(|def| def.iid)
            .collect()
    }

    /// Subtree rooted at `iid`, including `iid` itself.
    fn subtypes_transitive(&self, iid: TypeIid) -> Vec<TypeIid> {
        let mut out = vec![iid];
        let mut cursor = 0;
        while cursor < out.len() {
            let current = out[cursor];
            cursor += 1;
            out.extend(self.subtypes_direct(current));
        }
        out
    }

    fn subtree_depth(&self, iid: TypeIid) -> u64 {
        1 + self
            .subtypes_direct(iid)
            .into_iter()
            .map(|sub| self.subtree_depth(sub))
            .max()
            .unwrap_or(0)
    }

    fn would_cycle(&self, child: TypeIid, parent: TypeIid) -> bool {
        let mut current = Some(parent);
        while let Some(iid) = current {
            if iid == child {
                return true;
            }
            current = self.types.get(&iid).and_then(|def| def.parent);
        }
        false
    }
}

#[derive(Default)]
struct StatsInner {
    instance_count: FxHashMap<TypeIid, u64>,
    has_edge_count: FxHashMap<(TypeIid, TypeIid), u64>,
}

/// The loaded type DAG plus the derived statistics the planner costs with.
pub struct SchemaGraph {
    inner: RwLock<SchemaInner>,
    stats: RwLock<StatsInner>,
    snapshot: AtomicU64,
    root_entity: TypeIid,
    root_attribute: TypeIid,
    root_relation: TypeIid,
    root_role: TypeIid,
}

impl SchemaGraph {
    pub fn new() -> Self {
        let mut inner = SchemaInner::default();
        let mut root = |kind: TypeKind, label: &str| {
            let iid = inner.allocate(kind);
            inner.insert(TypeDef {
                iid,
                label: Label::of(label),
                parent: None,
                is_root: true,
                is_abstract: true,
                value_type: None,
                regex: None,
                owns: Vec::new(),
                plays: Vec::new(),
                relates: Vec::new(),
            })
        };
        let root_entity = root(TypeKind::Entity, "entity");
        let root_attribute = root(TypeKind::Attribute, "attribute");
        let root_relation = root(TypeKind::Relation, "relation");
        let root_role = root(TypeKind::Role, "role");
        Self {
            inner: RwLock::new(inner),
            stats: RwLock::new(StatsInner::default()),
            snapshot: AtomicU64::new(0),
            root_entity,
            root_attribute,
            root_relation,
            root_role,
        }
    }

    pub fn root_entity(&self) -> TypeIid {
        self.root_entity
    }

    pub fn root_attribute(&self) -> TypeIid {
        self.root_attribute
    }

    pub fn root_relation(&self) -> TypeIid {
        self.root_relation
    }

    pub fn root_role(&self) -> TypeIid {
        self.root_role
    }

    // ---- definition (schema transactions only) ----

    pub fn put_entity_type(&self, label: impl Into<Label>) -> Result<TypeIid> {
        self.put_type(label.into(), TypeKind::Entity, self.root_entity, None)
    }

    pub fn put_attribute_type(
        &self,
        label: impl Into<Label>,
        value_type: ValueType,
    ) -> Result<TypeIid> {
        self.put_type(
            label.into(),
            TypeKind::Attribute,
            self.root_attribute,
            Some(value_type),
        )
    }

    pub fn put_relation_type(&self, label: impl Into<Label>) -> Result<TypeIid> {
        self.put_type(label.into(), TypeKind::Relation, self.root_relation, None)
    }

    fn put_type(
        &self,
        label: Label,
        kind: TypeKind,
        root: TypeIid,
        value_type: Option<ValueType>,
    ) -> Result<TypeIid> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.label_index.get(&label.index_key()) {
            return Ok(*existing);
        }
        let iid = inner.allocate(kind);
        inner.insert(TypeDef {
            iid,
            label,
            parent: Some(root),
            is_root: false,
            is_abstract: false,
            value_type,
            regex: None,
            owns: Vec::new(),
            plays: Vec::new(),
            relates: Vec::new(),
        });
        self.bump();
        Ok(iid)
    }

    /// Declare a role type of `relation`; the role label is scoped by the
    /// relation's label.
    pub fn put_relates(&self, relation: TypeIid, role_name: &str) -> Result<TypeIid> {
        let mut inner = self.inner.write();
        let relation_label = inner.def(relation)?.label.clone();
        if inner.def(relation)?.iid.kind() != TypeKind::Relation {
            return Err(MotifError::IllegalState("relates on a non-relation type"));
        }
        let label = Label::scoped(role_name, relation_label.name());
        if let Some(existing) = inner.label_index.get(&label.index_key()) {
            return Ok(*existing);
        }
        let role = inner.allocate(TypeKind::Role);
        inner.insert(TypeDef {
            iid: role,
            label,
            parent: Some(self.root_role),
            is_root: false,
            is_abstract: false,
            value_type: None,
            regex: None,
            owns: Vec::new(),
            plays: Vec::new(),
            relates: Vec::new(),
        });
        inner
            .types
            .get_mut(&relation)
            .expect("checked above")
            .relates
            .push(role);
        self.bump();
        Ok(role)
    }

    pub fn put_plays(&self, player: TypeIid, role: TypeIid) -> Result<()> {
        let mut inner = self.inner.write();
        if role.kind() != TypeKind::Role {
            let player_label = inner.def(player)?.label.to_string();
            let role_label = inner.def(role)?.label.to_string();
            return Err(MotifError::IncompatiblePlays {
                player: player_label,
                role: role_label,
            });
        }
        let def = inner
            .types
            .get_mut(&player)
            .ok_or(MotifError::IllegalState("type iid not registered"))?;
        if !def.plays.contains(&role) {
            def.plays.push(role);
        }
        self.bump();
        Ok(())
    }

    pub fn put_owns(&self, owner: TypeIid, attribute: TypeIid, is_key: bool) -> Result<()> {
        let mut inner = self.inner.write();
        if attribute.kind() != TypeKind::Attribute {
            let owner_label = inner.def(owner)?.label.to_string();
            let attribute_label = inner.def(attribute)?.label.to_string();
            return Err(MotifError::IncompatibleOwns {
                owner: owner_label,
                attribute: attribute_label,
            });
        }
        let def = inner
            .types
            .get_mut(&owner)
            .ok_or(MotifError::IllegalState("type iid not registered"))?;
        if !def.owns.iter().any(|(iid, _)| *iid == attribute) {
            def.owns.push((attribute, is_key));
        }
        self.bump();
        Ok(())
    }

    pub fn put_sub(&self, child: TypeIid, parent: TypeIid) -> Result<()> {
        let mut inner = self.inner.write();
        if child.kind() != parent.kind() {
            return Err(MotifError::IllegalState("sub across partitions"));
        }
        if inner.would_cycle(child, parent) {
            let label = inner.def(child)?.label.to_string();
            return Err(MotifError::SchemaCycle(label));
        }
        inner
            .types
            .get_mut(&child)
            .ok_or(MotifError::IllegalState("type iid not registered"))?
            .parent = Some(parent);
        self.bump();
        Ok(())
    }

    pub fn set_abstract(&self, iid: TypeIid, is_abstract: bool) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .types
            .get_mut(&iid)
            .ok_or(MotifError::IllegalState("type iid not registered"))?
            .is_abstract = is_abstract;
        self.bump();
        Ok(())
    }

    /// Declare the value pattern of a string attribute type.
    pub fn put_regex(&self, iid: TypeIid, regex: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.write();
        let def = inner
            .types
            .get_mut(&iid)
            .ok_or(MotifError::IllegalState("type iid not registered"))?;
        if def.value_type != Some(ValueType::String) {
            return Err(MotifError::IllegalState("regex requires a string attribute type"));
        }
        def.regex = Some(regex.into());
        self.bump();
        Ok(())
    }

    pub fn regex_of(&self, iid: TypeIid) -> Result<Option<String>> {
        Ok(self.inner.read().def(iid)?.regex.clone())
    }

    pub fn undefine(&self, label: &Label) -> Result<()> {
        let mut inner = self.inner.write();
        let iid = inner.resolve(label)?;
        if inner.def(iid)?.is_root {
            return Err(MotifError::IllegalState("root types cannot be undefined"));
        }
        if !inner.subtypes_direct(iid).is_empty() {
            return Err(MotifError::SchemaCycle(label.to_string()));
        }
        inner.label_index.remove(&label.index_key());
        inner.types.remove(&iid);
        for def in inner.types.values_mut() {
            def.owns.retain(|(owned, _)| *owned != iid);
            def.plays.retain(|role| *role != iid);
            def.relates.retain(|role| *role != iid);
        }
        self.bump();
        Ok(())
    }

    // ---- lookup ----

    pub fn resolve(&self, label: &Label) -> Result<TypeIid> {
        self.inner.read().resolve(label)
    }

    pub fn label_of(&self, iid: TypeIid) -> Result<Label> {
        Ok(self.inner.read().def(iid)?.label.clone())
    }

    pub fn is_abstract(&self, iid: TypeIid) -> Result<bool> {
        Ok(self.inner.read().def(iid)?.is_abstract)
    }

    pub fn value_type_of(&self, iid: TypeIid) -> Result<Option<ValueType>> {
        Ok(self.inner.read().def(iid)?.value_type)
    }

    pub fn parent_of(&self, iid: TypeIid) -> Result<Option<TypeIid>> {
        Ok(self.inner.read().def(iid)?.parent)
    }

    pub fn subtypes_direct(&self, iid: TypeIid) -> Vec<TypeIid> {
        self.inner.read().subtypes_direct(iid)
    }

    pub fn subtypes_transitive(&self, iid: TypeIid) -> Vec<TypeIid> {
        self.inner.read().subtypes_transitive(iid)
    }

    /// True when `sub` is `sup` or a transitive subtype of it.
    pub fn is_subtype(&self, sub: TypeIid, sup: TypeIid) -> bool {
        let inner = self.inner.read();
        let mut current = Some(sub);
        while let Some(iid) = current {
            if iid == sup {
                return true;
            }
            current = inner.types.get(&iid).and_then(|def| def.parent);
        }
        false
    }

    pub fn relates_of(&self, relation: TypeIid) -> Result<Vec<TypeIid>> {
        Ok(self.inner.read().def(relation)?.relates.clone())
    }

    pub fn plays_of(&self, player: TypeIid) -> Result<Vec<TypeIid>> {
        Ok(self.inner.read().def(player)?.plays.clone())
    }

    pub fn owns_of(&self, owner: TypeIid) -> Result<Vec<(TypeIid, bool)>> {
        Ok(self.inner.read().def(owner)?.owns.clone())
    }

    /// The relation type whose `relates` list contains `role`.
    pub fn relation_of_role(&self, role: TypeIid) -> Result<TypeIid> {
        let inner = self.inner.read();
        inner
            .types
            .values()
            .find(|def| def.relates.contains(&role))
            .map(|def| def.iid)
            .ok_or(MotifError::IllegalState("role type has no relation scope"))
    }

    /// Types that own `attribute`, directly or via an ancestor declaration.
    pub fn owners_of_attribute(&self, attribute: TypeIid) -> Vec<TypeIid> {
        let inner = self.inner.read();
        let declared: Vec<TypeIid> = inner
            .types
            .values()
            .filter(|def| def.owns.iter().any(|(iid, _)| *iid == attribute))
            .map(|def| def.iid)
            .collect();
        let mut owners = Vec::new();
        for owner in declared {
            for sub in inner.subtypes_transitive(owner) {
                if !owners.contains(&sub) {
                    owners.push(sub);
                }
            }
        }
        owners
    }

    /// Attribute types ownable by `owner`, following its supertype chain.
    pub fn owned_attribute_types(&self, owner: TypeIid) -> Vec<TypeIid> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        let mut current = Some(owner);
        while let Some(iid) = current {
            if let Ok(def) = inner.def(iid) {
                for (attr, _) in &def.owns {
                    if !out.contains(attr) {
                        out.push(*attr);
                    }
                }
                current = def.parent;
            } else {
                break;
            }
        }
        out
    }

    pub fn entity_types(&self) -> Vec<TypeIid> {
        self.subtypes_transitive(self.root_entity)
    }

    pub fn attribute_types(&self) -> Vec<TypeIid> {
        self.subtypes_transitive(self.root_attribute)
    }

    pub fn relation_types(&self) -> Vec<TypeIid> {
        self.subtypes_transitive(self.root_relation)
    }

    /// Every non-role type (the `thing` umbrella).
    pub fn thing_types(&self) -> Vec<TypeIid> {
        let mut out = self.entity_types();
        out.extend(self.attribute_types());
        out.extend(self.relation_types());
        out
    }

    // ---- statistics ----

    pub fn snapshot(&self) -> u64 {
        self.snapshot.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.snapshot.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_vertex_created(&self, type_iid: TypeIid, delta: u64) {
        *self
            .stats
            .write()
            .instance_count
            .entry(type_iid)
            .or_insert(0) += delta;
        self.bump();
    }

    pub(crate) fn record_vertex_deleted(&self, type_iid: TypeIid, delta: u64) {
        let mut stats = self.stats.write();
        if let Some(count) = stats.instance_count.get_mut(&type_iid) {
            *count = count.saturating_sub(delta);
        }
        self.bump();
    }

    pub fn record_has_edge(&self, owner: TypeIid, attribute: TypeIid, delta: i64) {
        let mut stats = self.stats.write();
        let count = stats.has_edge_count.entry((owner, attribute)).or_insert(0);
        *count = count.saturating_add_signed(delta);
        self.bump();
    }

    /// Test hook: force a statistic without going through a data write.
    pub fn override_instance_count(&self, type_iid: TypeIid, count: u64) {
        self.stats.write().instance_count.insert(type_iid, count);
        self.bump();
    }

    pub fn stats(&self) -> SchemaStats<'_> {
        SchemaStats { graph: self }
    }
}

impl Default for SchemaGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-side statistics facade; every query reads the current published
/// counters without blocking writers for long.
pub struct SchemaStats<'a> {
    graph: &'a SchemaGraph,
}

impl SchemaStats<'_> {
    pub fn instances_count(&self, iid: TypeIid) -> u64 {
        self.graph
            .stats
            .read()
            .instance_count
            .get(&iid)
            .copied()
            .unwrap_or(0)
    }

    pub fn instances_transitive(&self, iid: TypeIid) -> u64 {
        let subtypes = self.graph.subtypes_transitive(iid);
        let stats = self.graph.stats.read();
        subtypes
            .iter()
            .map(|sub| stats.instance_count.get(sub).copied().unwrap_or(0))
            .sum()
    }

    pub fn instances_sum(&self, iids: &[TypeIid]) -> u64 {
        let stats = self.graph.stats.read();
        iids.iter()
            .map(|iid| stats.instance_count.get(iid).copied().unwrap_or(0))
            .sum()
    }

    pub fn instances_max(&self, iids: &[TypeIid]) -> u64 {
        let stats = self.graph.stats.read();
        iids.iter()
            .map(|iid| stats.instance_count.get(iid).copied().unwrap_or(0))
            .max()
            .unwrap_or(0)
    }

    pub fn instances_transitive_max(&self, iids: &[TypeIid]) -> u64 {
        iids.iter()
            .map(|iid| self.instances_transitive(*iid))
            .max()
            .unwrap_or(0)
    }

    /// Max depth of the subtree under any of the given types.
    pub fn sub_types_depth(&self, iids: &[TypeIid]) -> u64 {
        let inner = self.graph.inner.read();
        iids.iter()
            .map(|iid| inner.subtree_depth(*iid))
            .max()
            .unwrap_or(0)
    }

    pub fn sub_types_sum(&self, iids: &[TypeIid], transitive: bool) -> u64 {
        iids.iter()
            .map(|iid| self.sub_count(*iid, transitive))
            .sum()
    }

    pub fn sub_types_mean(&self, iids: &[TypeIid], transitive: bool) -> f64 {
        if iids.is_empty() {
            return 0.0;
        }
        self.sub_types_sum(iids, transitive) as f64 / iids.len() as f64
    }

    fn sub_count(&self, iid: TypeIid, transitive: bool) -> u64 {
        let inner = self.graph.inner.read();
        if transitive {
            inner.subtypes_transitive(iid).len() as u64
        } else {
            inner.subtypes_direct(iid).len() as u64
        }
    }

    /// Attribute types whose value kind is comparable to any attribute type
    /// in the given set.
    pub fn att_types_comparable_to(&self, iids: &[TypeIid]) -> u64 {
        let value_types: Vec<_> = iids
            .iter()
            .filter_map(|iid| self.graph.value_type_of(*iid).ok().flatten())
            .collect();
        if value_types.is_empty() {
            return self.attribute_type_count();
        }
        self.graph
            .attribute_types()
            .into_iter()
            .filter_map(|iid| self.graph.value_type_of(iid).ok().flatten())
            .filter(|vt| value_types.iter().any(|other| vt.comparable_to(*other)))
            .count() as u64
    }

    pub fn attribute_type_count(&self) -> u64 {
        self.graph.attribute_types().len() as u64
    }

    pub fn count_has_edges(&self, owners: &[TypeIid], attributes: &[TypeIid]) -> u64 {
        let stats = self.graph.stats.read();
        owners
            .iter()
            .flat_map(|owner| {
                attributes
                    .iter()
                    .map(move |attribute| (*owner, *attribute))
            })
            .map(|pair| stats.has_edge_count.get(&pair).copied().unwrap_or(0))
            .sum()
    }

    pub fn mean_out_degree(&self, counts: &[(TypeIid, usize)]) -> f64 {
        if counts.is_empty() {
            return 0.0;
        }
        counts.iter().map(|(_, n)| *n).sum::<usize>() as f64 / counts.len() as f64
    }

    pub fn out_owns_mean(&self, iids: &[TypeIid], key_only: bool) -> f64 {
        let degrees: Vec<(TypeIid, usize)> = iids
            .iter()
            .filter_map(|iid| {
                self.graph.owns_of(*iid).ok().map(|owns| {
                    let n = owns
                        .iter()
                        .filter(|(_, is_key)| !key_only || *is_key)
                        .count();
                    (*iid, n)
                })
            })
            .collect();
        self.mean_out_degree(&degrees)
    }

    pub fn in_owns_mean(&self, attribute_iids: &[TypeIid], key_only: bool) -> f64 {
        let inner = self.graph.inner.read();
        if attribute_iids.is_empty() {
            return 0.0;
        }
        let total: usize = attribute_iids
            .iter()
            .map(|attribute| {
                inner
                    .types
                    .values()
                    .filter(|def| {
                        def.owns
                            .iter()
                            .any(|(iid, is_key)| iid == attribute && (!key_only || *is_key))
                    })
                    .count()
            })
            .sum();
        total as f64 / attribute_iids.len() as f64
    }

    pub fn out_plays_mean(&self, iids: &[TypeIid]) -> f64 {
        let degrees: Vec<(TypeIid, usize)> = iids
            .iter()
            .filter_map(|iid| self.graph.plays_of(*iid).ok().map(|plays| (*iid, plays.len())))
            .collect();
        self.mean_out_degree(&degrees)
    }

    pub fn in_plays_mean(&self, role_iids: &[TypeIid]) -> f64 {
        let inner = self.graph.inner.read();
        if role_iids.is_empty() {
            return 0.0;
        }
        let total: usize = role_iids
            .iter()
            .map(|role| {
                inner
                    .types
                    .values()
                    .filter(|def| def.plays.contains(role))
                    .count()
            })
            .sum();
        total as f64 / role_iids.len() as f64
    }

    pub fn out_relates_mean(&self, iids: &[TypeIid]) -> f64 {
        let degrees: Vec<(TypeIid, usize)> = iids
            .iter()
            .filter_map(|iid| {
                self.graph
                    .relates_of(*iid)
                    .ok()
                    .map(|relates| (*iid, relates.len()))
            })
            .collect();
        self.mean_out_degree(&degrees)
    }
}
