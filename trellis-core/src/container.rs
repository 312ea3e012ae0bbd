// Dependency injection container

use crate::logging::{debug, trace, warn};
use crate::metadata::{BeanObject, ComponentDescriptor, MetadataIndex, SiteKind, TypeRef, Wiring};
use crate::Error;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Group registered by the web layer with every controller, in declaration order
pub const CONTROLLERS_GROUP: &str = "trellis.controllers";

/// Container-level policy switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerOptions {
    /// Fail with `AmbiguousBean` when an abstract type has several implementations.
    /// When off, the first implementation in definition order is injected.
    pub autowire_single_impl: bool,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            autowire_single_impl: true,
        }
    }
}

/// Explicit (identifier, concrete type) pair from external configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitBean {
    pub id: String,
    pub type_name: String,
}

impl ExplicitBean {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
        }
    }
}

/// A realized bean plus the identifier it was created for
#[derive(Clone)]
pub struct BeanInstance {
    id: Arc<str>,
    object: BeanObject,
    descriptor: Arc<ComponentDescriptor>,
}

impl BeanInstance {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> &'static str {
        self.descriptor.type_name()
    }

    pub fn descriptor(&self) -> &Arc<ComponentDescriptor> {
        &self.descriptor
    }

    pub fn object(&self) -> &BeanObject {
        &self.object
    }

    /// View the bean as its concrete type
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.object.clone().downcast::<T>().ok()
    }

    /// View the bean through an abstract type it implements
    pub fn cast<I: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<I>> {
        self.descriptor.cast_to::<I>(&self.object)
    }

    /// Whether both handles point at the same object
    pub fn ptr_eq(&self, other: &BeanInstance) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl fmt::Debug for BeanInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanInstance")
            .field("id", &self.id)
            .field("type_name", &self.type_name())
            .finish()
    }
}

/// Identifier → component mapping the container builds from
#[derive(Debug, Default)]
pub struct BeanDefinitions {
    entries: Vec<(String, Arc<ComponentDescriptor>)>,
    by_id: HashMap<String, usize>,
}

impl BeanDefinitions {
    /// Explicit entries first, then every scanned component whose identifier is still free
    pub fn new(index: &MetadataIndex, explicit: &[ExplicitBean]) -> Result<Self, Error> {
        let mut definitions = Self::default();

        for bean in explicit {
            if definitions.contains(&bean.id) {
                return Err(Error::DuplicateBeanDefinition(bean.id.clone()));
            }
            let descriptor = index.find_by_type_name(&bean.type_name).ok_or_else(|| {
                Error::BeanCandidateNotFound {
                    id: bean.id.clone(),
                    type_name: bean.type_name.clone(),
                }
            })?;
            debug!(bean = %bean.id, type_name = %bean.type_name, "Explicit bean definition");
            definitions.push(bean.id.clone(), descriptor.clone());
        }

        for descriptor in index.components() {
            if !definitions.contains(descriptor.id()) {
                definitions.push(descriptor.id().to_string(), descriptor.clone());
            }
        }

        Ok(definitions)
    }

    fn push(&mut self, id: String, descriptor: Arc<ComponentDescriptor>) {
        self.by_id.insert(id.clone(), self.entries.len());
        self.entries.push((id, descriptor));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ComponentDescriptor>> {
        self.by_id.get(id).map(|&slot| &self.entries[slot].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Definitions in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<ComponentDescriptor>)> {
        self.entries
            .iter()
            .map(|(id, descriptor)| (id.as_str(), descriptor))
    }
}

struct Slot {
    descriptor: Arc<ComponentDescriptor>,
    instance: OnceLock<BeanInstance>,
    init: Mutex<()>,
}

/// Builder for [`BeanContainer`]
pub struct ContainerBuilder<'a> {
    index: &'a MetadataIndex,
    explicit: Vec<ExplicitBean>,
    groups: Vec<(String, Vec<String>)>,
    options: ContainerOptions,
}

impl<'a> ContainerBuilder<'a> {
    /// Add explicit bean definitions (they override scanned ones)
    pub fn explicit(mut self, beans: impl IntoIterator<Item = ExplicitBean>) -> Self {
        self.explicit.extend(beans);
        self
    }

    /// Register a named group with its members in order
    pub fn group<I, S>(mut self, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .push((name.into(), members.into_iter().map(Into::into).collect()));
        self
    }

    /// Register [`CONTROLLERS_GROUP`] with every indexed controller
    pub fn controllers_group(self) -> Self {
        let members: Vec<String> = self
            .index
            .controllers()
            .map(|controller| controller.id().to_string())
            .collect();
        self.group(CONTROLLERS_GROUP, members)
    }

    pub fn options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the container. Dependency cycles are rejected here, before any
    /// worker can start resolving.
    pub fn build(self) -> Result<BeanContainer, Error> {
        let container = self.assemble()?;
        container.check_cycles()?;

        debug!(
            definitions = container.definitions.len(),
            groups = container.groups.len(),
            "DI container ready"
        );
        Ok(container)
    }

    fn assemble(self) -> Result<BeanContainer, Error> {
        let definitions = BeanDefinitions::new(self.index, &self.explicit)?;

        let slots = definitions
            .iter()
            .map(|(id, descriptor)| {
                let slot = Slot {
                    descriptor: descriptor.clone(),
                    instance: OnceLock::new(),
                    init: Mutex::new(()),
                };
                (id.to_string(), slot)
            })
            .collect();

        let mut groups = HashMap::new();
        for (name, members) in self.groups {
            debug!(group = %name, members = members.len(), "Registered bean group");
            groups.insert(name, members);
        }

        Ok(BeanContainer {
            definitions,
            slots,
            groups,
            options: self.options,
        })
    }
}

/// The dependency injection container.
///
/// Beans are built lazily on first resolution and cached for the lifetime of the
/// container. Every identifier owns its own construction guard, so concurrent
/// first resolutions of one identifier build it exactly once while cached reads
/// take no lock at all.
pub struct BeanContainer {
    definitions: BeanDefinitions,
    slots: HashMap<String, Slot>,
    groups: HashMap<String, Vec<String>>,
    options: ContainerOptions,
}

impl BeanContainer {
    pub fn builder(index: &MetadataIndex) -> ContainerBuilder<'_> {
        ContainerBuilder {
            index,
            explicit: Vec::new(),
            groups: Vec::new(),
            options: ContainerOptions::default(),
        }
    }

    /// Container over the scanned components with default options
    pub fn new(index: &MetadataIndex) -> Result<Self, Error> {
        Self::builder(index).build()
    }

    pub fn options(&self) -> ContainerOptions {
        self.options
    }

    pub fn definitions(&self) -> &BeanDefinitions {
        &self.definitions
    }

    /// Check if a bean definition exists
    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Check if a bean has already been constructed
    pub fn is_instantiated(&self, id: &str) -> bool {
        self.slots
            .get(id)
            .is_some_and(|slot| slot.instance.get().is_some())
    }

    pub fn group_members(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    /// Resolve a bean by identifier
    pub fn resolve(&self, id: &str) -> Result<BeanInstance, Error> {
        self.resolve_in(id, &mut Vec::new())
    }

    /// Resolve a bean by type, or by qualifier when one is given
    pub fn resolve_by_type(&self, target: &TypeRef, qualifier: Option<&str>) -> Result<BeanInstance, Error> {
        let mut stack = Vec::new();
        match qualifier {
            Some(id) => self.resolve_in(id, &mut stack),
            None => {
                let id = self.select(target)?;
                self.resolve_in(&id, &mut stack)
            }
        }
    }

    /// Resolve a concrete type
    pub fn resolve_as<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, Error> {
        let bean = self.resolve_by_type(&TypeRef::concrete::<T>(), None)?;
        bean.downcast::<T>().ok_or_else(|| {
            Error::DependencyInjection(format!(
                "bean {} is not a {}",
                bean.id(),
                std::any::type_name::<T>()
            ))
        })
    }

    /// Resolve the implementation of an abstract type
    pub fn resolve_interface<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>, Error> {
        let bean = self.resolve_by_type(&TypeRef::interface::<I>(), None)?;
        bean.cast::<I>().ok_or_else(|| {
            Error::DependencyInjection(format!(
                "bean {} does not implement {}",
                bean.id(),
                std::any::type_name::<I>()
            ))
        })
    }

    /// Resolve every member of a named group, in group order
    pub fn resolve_group(&self, name: &str) -> Result<Vec<BeanInstance>, Error> {
        self.resolve_group_in(name, &mut Vec::new())
    }

    fn resolve_group_in(&self, name: &str, stack: &mut Vec<String>) -> Result<Vec<BeanInstance>, Error> {
        let members = self
            .groups
            .get(name)
            .ok_or_else(|| Error::UnknownGroup(name.to_string()))?;
        members
            .iter()
            .map(|member| self.resolve_in(member, stack))
            .collect()
    }

    fn resolve_in(&self, id: &str, stack: &mut Vec<String>) -> Result<BeanInstance, Error> {
        let slot = self
            .slots
            .get(id)
            .ok_or_else(|| Error::UnknownBean(id.to_string()))?;

        if let Some(instance) = slot.instance.get() {
            trace!(bean = id, "Resolved cached bean");
            return Ok(instance.clone());
        }

        if stack.iter().any(|pending| pending == id) {
            let mut path = stack.clone();
            path.push(id.to_string());
            return Err(Error::CyclicDependency(path));
        }

        let _guard = slot.init.lock();
        // Another worker may have finished while we waited
        if let Some(instance) = slot.instance.get() {
            return Ok(instance.clone());
        }

        stack.push(id.to_string());
        let built = self.construct(id, &slot.descriptor, stack);
        stack.pop();
        let instance = built?;

        let instance = slot.instance.get_or_init(|| instance).clone();
        debug!(bean = id, type_name = instance.type_name(), "Bean constructed");
        Ok(instance)
    }

    fn construct(
        &self,
        id: &str,
        descriptor: &Arc<ComponentDescriptor>,
        stack: &mut Vec<String>,
    ) -> Result<BeanInstance, Error> {
        let mut wiring = Wiring::new(id);

        for site in descriptor.sites() {
            trace!(bean = id, site = site.name, "Injecting");
            match &site.kind {
                SiteKind::Qualified(qualifier) => {
                    wiring.insert_bean(site.name, self.resolve_in(qualifier, stack)?);
                }
                SiteKind::Type(target) => {
                    let target_id = self.select(target)?;
                    wiring.insert_bean(site.name, self.resolve_in(&target_id, stack)?);
                }
                SiteKind::Group(group) => {
                    wiring.insert_group(site.name, self.resolve_group_in(group, stack)?);
                }
            }
        }

        let object = descriptor.construct(&mut wiring)?;
        Ok(BeanInstance {
            id: Arc::from(id),
            object,
            descriptor: descriptor.clone(),
        })
    }

    /// Pick the definition that satisfies `target`
    fn select(&self, target: &TypeRef) -> Result<String, Error> {
        if self.definitions.contains(target.name) {
            return Ok(target.name.to_string());
        }
        if !target.is_abstract {
            return self.select_concrete(target);
        }

        let candidates: Vec<&str> = self
            .definitions
            .iter()
            .filter(|(_, descriptor)| descriptor.implements(target))
            .map(|(id, _)| id)
            .collect();

        match candidates.as_slice() {
            [] => Err(Error::NoCompatibleBean(target.name.to_string())),
            [only] => Ok(only.to_string()),
            [first, ..] if !self.options.autowire_single_impl => {
                warn!(
                    type_name = target.name,
                    chosen = *first,
                    candidates = candidates.len(),
                    "Ambiguity check disabled, injecting first implementation"
                );
                Ok(first.to_string())
            }
            _ => Err(Error::AmbiguousBean {
                type_name: target.name.to_string(),
                candidates: candidates.iter().map(|id| id.to_string()).collect(),
            }),
        }
    }

    /// A concrete type registered under a custom identifier. The component's own
    /// identifier is preferred over explicit aliases of the same type.
    fn select_concrete(&self, target: &TypeRef) -> Result<String, Error> {
        let mut same_type = self
            .definitions
            .iter()
            .filter(|(_, descriptor)| descriptor.type_id() == target.type_id)
            .peekable();
        let first = same_type.peek().map(|(id, _)| id.to_string());

        same_type
            .find(|(id, descriptor)| *id == descriptor.id())
            .map(|(id, _)| id.to_string())
            .or(first)
            .ok_or_else(|| Error::UnknownBean(target.name.to_string()))
    }

    /// Reject dependency cycles before anything is constructed.
    ///
    /// Only edges that can be resolved statically are followed; an unresolvable
    /// site is reported when (and if) it is actually resolved.
    fn check_cycles(&self) -> Result<(), Error> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'c>(
            container: &'c BeanContainer,
            id: &'c str,
            marks: &mut HashMap<&'c str, Mark>,
            path: &mut Vec<&'c str>,
        ) -> Result<(), Error> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|step| *step == id).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(id.to_string());
                    return Err(Error::CyclicDependency(cycle));
                }
                None => {}
            }

            let Some((key, slot)) = container.slots.get_key_value(id) else {
                return Ok(());
            };
            marks.insert(key.as_str(), Mark::Visiting);
            path.push(key.as_str());

            for next in container.static_edges(&slot.descriptor) {
                if let Some((next_key, _)) = container.slots.get_key_value(next.as_str()) {
                    visit(container, next_key.as_str(), marks, path)?;
                }
            }

            path.pop();
            marks.insert(key.as_str(), Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        for (id, _) in self.definitions.iter() {
            visit(self, id, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn static_edges(&self, descriptor: &ComponentDescriptor) -> Vec<String> {
        let mut edges = Vec::new();
        for site in descriptor.sites() {
            match &site.kind {
                SiteKind::Qualified(id) => edges.push(id.clone()),
                SiteKind::Type(target) => {
                    if let Ok(id) = self.select(target) {
                        edges.push(id);
                    }
                }
                SiteKind::Group(group) => {
                    if let Some(members) = self.groups.get(group) {
                        edges.extend(members.iter().cloned());
                    }
                }
            }
        }
        edges
    }
}

impl fmt::Debug for BeanContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanContainer")
            .field("definitions", &self.definitions.len())
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Engine;
    struct Car {
        engine: Arc<Engine>,
    }

    fn index() -> MetadataIndex {
        MetadataIndex::scan([
            ComponentDescriptor::component::<Engine>().build(|_| Ok(Engine)),
            ComponentDescriptor::service::<Car>()
                .inject::<Engine>("engine")
                .build(|wiring| {
                    Ok(Car {
                        engine: wiring.bean::<Engine>("engine")?,
                    })
                }),
        ])
        .unwrap()
    }

    #[test]
    fn test_resolve_wires_dependencies() {
        let index = index();
        let container = BeanContainer::new(&index).unwrap();

        let car = container.resolve_as::<Car>().unwrap();
        let engine = container.resolve_as::<Engine>().unwrap();
        assert!(Arc::ptr_eq(&car.engine, &engine));
    }

    #[test]
    fn test_lazy_construction() {
        let index = index();
        let container = BeanContainer::new(&index).unwrap();
        let engine_id = std::any::type_name::<Engine>();

        assert!(container.contains(engine_id));
        assert!(!container.is_instantiated(engine_id));
        container.resolve(engine_id).unwrap();
        assert!(container.is_instantiated(engine_id));
    }

    #[test]
    fn test_unknown_bean() {
        let index = index();
        let container = BeanContainer::new(&index).unwrap();
        let err = container.resolve("nope").unwrap_err();
        assert!(matches!(err, Error::UnknownBean(id) if id == "nope"));
    }

    #[test]
    fn test_duplicate_explicit_definition() {
        let index = index();
        let engine = std::any::type_name::<Engine>();
        let result = BeanContainer::builder(&index)
            .explicit([
                ExplicitBean::new("engine", engine),
                ExplicitBean::new("engine", engine),
            ])
            .build();
        assert!(matches!(result, Err(Error::DuplicateBeanDefinition(id)) if id == "engine"));
    }

    #[test]
    fn test_explicit_candidate_must_exist() {
        let index = index();
        let result = BeanContainer::builder(&index)
            .explicit([ExplicitBean::new("ghost", "app::Ghost")])
            .build();
        assert!(matches!(result, Err(Error::BeanCandidateNotFound { .. })));
    }

    #[test]
    fn test_concrete_type_under_custom_id() {
        let index = MetadataIndex::scan([
            ComponentDescriptor::component::<Engine>()
                .id("engine")
                .build(|_| Ok(Engine)),
            ComponentDescriptor::service::<Car>()
                .inject::<Engine>("engine")
                .build(|wiring| {
                    Ok(Car {
                        engine: wiring.bean::<Engine>("engine")?,
                    })
                }),
        ])
        .unwrap();
        let container = BeanContainer::new(&index).unwrap();

        let car = container.resolve_as::<Car>().unwrap();
        let engine = container.resolve_as::<Engine>().unwrap();
        assert!(Arc::ptr_eq(&car.engine, &engine));
        assert!(container.is_instantiated("engine"));
        assert!(!container.contains(std::any::type_name::<Engine>()));
    }

    struct Ping;
    struct Pong;

    #[test]
    fn test_resolution_stack_reports_cycle() {
        let index = MetadataIndex::scan([
            ComponentDescriptor::component::<Ping>()
                .id("ping")
                .inject_qualified("pong", "pong")
                .build(|_| Ok(Ping)),
            ComponentDescriptor::component::<Pong>()
                .id("pong")
                .inject_qualified("ping", "ping")
                .build(|_| Ok(Pong)),
        ])
        .unwrap();
        // Skip the build-time graph walk so only the per-call stack sees the loop
        let container = BeanContainer::builder(&index).assemble().unwrap();

        match container.resolve("ping") {
            Err(Error::CyclicDependency(path)) => assert_eq!(path, vec!["ping", "pong", "ping"]),
            other => panic!("expected CyclicDependency, got {:?}", other.map(|_| ())),
        }
        assert!(!container.is_instantiated("ping"));
        assert!(!container.is_instantiated("pong"));
    }
}
