//! Component metadata and the startup index.
//!
//! Components are described with [`ComponentDescriptor`] builders instead of
//! runtime attributes. A descriptor carries everything the container and the
//! route table need: identifier, injection sites, the interfaces the component
//! can be viewed as, a factory, and for controllers their routes and hooks.
//!
//! Descriptors reach the index either directly through [`MetadataIndex::scan`]
//! or through the compile-time registry filled by [`register_component!`].
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::metadata::{ComponentDescriptor, MetadataIndex};
//!
//! trait Clock: Send + Sync {
//!     fn now(&self) -> u64;
//! }
//!
//! struct FixedClock;
//! impl Clock for FixedClock {
//!     fn now(&self) -> u64 { 42 }
//! }
//!
//! struct Greeter {
//!     clock: Arc<dyn Clock>,
//! }
//!
//! let index = MetadataIndex::scan([
//!     ComponentDescriptor::component::<FixedClock>()
//!         .implements::<dyn Clock>(|clock| clock as Arc<dyn Clock>)
//!         .build(|_| Ok(FixedClock)),
//!     ComponentDescriptor::service::<Greeter>()
//!         .inject_interface::<dyn Clock>("clock")
//!         .build(|wiring| Ok(Greeter { clock: wiring.interface::<dyn Clock>("clock")? })),
//! ])
//! .unwrap();
//!
//! assert_eq!(index.len(), 2);
//! ```

use crate::container::BeanInstance;
use crate::logging::{debug, warn};
use crate::routing::{HandlerFn, RouteDeclaration, RouteSpec};
use crate::{Arguments, Error, RequestContext};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Type-erased bean object as stored in the singleton pool
pub type BeanObject = Arc<dyn Any + Send + Sync>;

/// Factory building a bean from its resolved injection sites
pub type FactoryFn = Arc<dyn Fn(&mut Wiring) -> Result<BeanObject, Error> + Send + Sync>;

/// Controller lifecycle hook (before / after the handler)
pub type HookFn = Arc<dyn Fn(&BeanObject, &mut RequestContext) -> Result<(), Error> + Send + Sync>;

type CastFn = Arc<dyn Fn(&BeanObject) -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;

/// Reference to a concrete or abstract (`dyn Trait`) type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeRef {
    pub name: &'static str,
    pub type_id: TypeId,
    pub is_abstract: bool,
}

impl TypeRef {
    pub fn concrete<T: Any>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            is_abstract: false,
        }
    }

    pub fn interface<I: ?Sized + 'static>() -> Self {
        Self {
            name: std::any::type_name::<I>(),
            type_id: TypeId::of::<I>(),
            is_abstract: true,
        }
    }
}

/// How an injection site is satisfied
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SiteKind {
    /// Resolve by type (concrete identifier, or unique implementation)
    Type(TypeRef),
    /// Resolve the given bean identifier directly
    Qualified(String),
    /// Resolve every member of a named group
    Group(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectionSite {
    pub name: &'static str,
    pub kind: SiteKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    Component,
    Service,
    Controller,
}

struct InterfaceBinding {
    type_ref: TypeRef,
    cast: CastFn,
}

/// Controller-only metadata
#[derive(Default)]
pub struct ControllerMeta {
    pub routes: Vec<RouteDeclaration>,
    pub before: Option<HookFn>,
    pub after: Option<HookFn>,
    pub cors: bool,
}

/// Immutable description of one component
pub struct ComponentDescriptor {
    id: String,
    type_name: &'static str,
    type_id: TypeId,
    kind: ComponentKind,
    sites: Vec<InjectionSite>,
    interfaces: Vec<InterfaceBinding>,
    factory: FactoryFn,
    controller: ControllerMeta,
}

impl ComponentDescriptor {
    /// Start describing a plain component
    pub fn component<T: Send + Sync + 'static>() -> ComponentBuilder<T> {
        ComponentBuilder::new(ComponentKind::Component)
    }

    /// Start describing a service component
    pub fn service<T: Send + Sync + 'static>() -> ComponentBuilder<T> {
        ComponentBuilder::new(ComponentKind::Service)
    }

    /// Start describing a controller
    pub fn controller<T: Send + Sync + 'static>() -> ComponentBuilder<T> {
        ComponentBuilder::new(ComponentKind::Controller)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type name without its module path, used in handler names
    pub fn short_name(&self) -> &'static str {
        self.type_name.rsplit("::").next().unwrap_or(self.type_name)
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn is_controller(&self) -> bool {
        self.kind == ComponentKind::Controller
    }

    pub fn sites(&self) -> &[InjectionSite] {
        &self.sites
    }

    pub fn routes(&self) -> &[RouteDeclaration] {
        &self.controller.routes
    }

    pub fn controller_meta(&self) -> &ControllerMeta {
        &self.controller
    }

    /// Whether this component can be viewed as the abstract type `target`
    pub fn implements(&self, target: &TypeRef) -> bool {
        self.interfaces
            .iter()
            .any(|binding| binding.type_ref.type_id == target.type_id)
    }

    pub fn interface_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.interfaces.iter().map(|binding| binding.type_ref.name)
    }

    pub(crate) fn construct(&self, wiring: &mut Wiring) -> Result<BeanObject, Error> {
        (self.factory)(wiring)
    }

    pub(crate) fn cast_to<I: ?Sized + Send + Sync + 'static>(&self, object: &BeanObject) -> Option<Arc<I>> {
        let target = TypeId::of::<I>();
        let binding = self
            .interfaces
            .iter()
            .find(|binding| binding.type_ref.type_id == target)?;
        let boxed = (binding.cast)(object)?;
        boxed.downcast::<Arc<I>>().ok().map(|arc| *arc)
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .field("sites", &self.sites)
            .field("interfaces", &self.interface_names().collect::<Vec<_>>())
            .field("routes", &self.controller.routes.len())
            .finish()
    }
}

/// Typed builder producing a [`ComponentDescriptor`]
pub struct ComponentBuilder<T> {
    id: Option<String>,
    kind: ComponentKind,
    sites: Vec<InjectionSite>,
    interfaces: Vec<InterfaceBinding>,
    controller: ControllerMeta,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ComponentBuilder<T> {
    fn new(kind: ComponentKind) -> Self {
        Self {
            id: None,
            kind,
            sites: Vec::new(),
            interfaces: Vec::new(),
            controller: ControllerMeta::default(),
            _marker: PhantomData,
        }
    }

    /// Override the identifier (defaults to the fully-qualified type name)
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Inject a concrete dependency by its type
    pub fn inject<D: Any>(self, site: &'static str) -> Self {
        self.site(site, SiteKind::Type(TypeRef::concrete::<D>()))
    }

    /// Inject the implementation of an abstract type
    pub fn inject_interface<I: ?Sized + 'static>(self, site: &'static str) -> Self {
        self.site(site, SiteKind::Type(TypeRef::interface::<I>()))
    }

    /// Inject the bean registered under `qualifier`
    pub fn inject_qualified(self, site: &'static str, qualifier: impl Into<String>) -> Self {
        self.site(site, SiteKind::Qualified(qualifier.into()))
    }

    /// Inject every member of a named group, in group order
    pub fn inject_group(self, site: &'static str, group: impl Into<String>) -> Self {
        self.site(site, SiteKind::Group(group.into()))
    }

    fn site(mut self, name: &'static str, kind: SiteKind) -> Self {
        self.sites.push(InjectionSite { name, kind });
        self
    }

    /// Declare that this component can be injected where `I` is requested
    pub fn implements<I>(mut self, cast: fn(Arc<T>) -> Arc<I>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let cast: CastFn = Arc::new(move |object: &BeanObject| {
            let concrete = object.clone().downcast::<T>().ok()?;
            Some(Box::new(cast(concrete)) as Box<dyn Any + Send + Sync>)
        });
        self.interfaces.push(InterfaceBinding {
            type_ref: TypeRef::interface::<I>(),
            cast,
        });
        self
    }

    /// Allow cross-origin requests on every route of this controller
    pub fn cors(mut self) -> Self {
        self.controller.cors = true;
        self
    }

    /// Declare a route handled by this controller
    pub fn route<F>(mut self, spec: RouteSpec, handler: F) -> Self
    where
        F: Fn(&T, &mut Arguments, &mut RequestContext) -> Result<(), Error> + Send + Sync + 'static,
    {
        let handler: HandlerFn = Arc::new(
            move |object: &BeanObject, args: &mut Arguments, ctx: &mut RequestContext| {
                let controller = downcast_controller::<T>(object)?;
                handler(controller, args, ctx)
            },
        );
        self.controller.routes.push(spec.into_declaration(handler));
        self
    }

    /// Hook run before every handler of this controller
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T, &mut RequestContext) -> Result<(), Error> + Send + Sync + 'static,
    {
        if self.controller.before.is_some() {
            warn!(
                controller = std::any::type_name::<T>(),
                "Multiple before hooks declared, keeping the first"
            );
            return self;
        }
        self.controller.before = Some(erase_hook(hook));
        self
    }

    /// Hook run after every handler of this controller
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T, &mut RequestContext) -> Result<(), Error> + Send + Sync + 'static,
    {
        if self.controller.after.is_some() {
            warn!(
                controller = std::any::type_name::<T>(),
                "Multiple after hooks declared, keeping the first"
            );
            return self;
        }
        self.controller.after = Some(erase_hook(hook));
        self
    }

    /// Finish the descriptor with the factory that builds the component
    pub fn build<F>(self, factory: F) -> ComponentDescriptor
    where
        F: Fn(&mut Wiring) -> Result<T, Error> + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<T>();
        ComponentDescriptor {
            id: self.id.unwrap_or_else(|| type_name.to_string()),
            type_name,
            type_id: TypeId::of::<T>(),
            kind: self.kind,
            sites: self.sites,
            interfaces: self.interfaces,
            factory: Arc::new(move |wiring: &mut Wiring| {
                Ok(Arc::new(factory(wiring)?) as BeanObject)
            }),
            controller: self.controller,
        }
    }
}

fn downcast_controller<T: 'static>(object: &BeanObject) -> Result<&T, Error> {
    object.as_ref().downcast_ref::<T>().ok_or_else(|| {
        Error::Internal(format!(
            "controller bean is not a {}",
            std::any::type_name::<T>()
        ))
    })
}

fn erase_hook<T, F>(hook: F) -> HookFn
where
    T: Send + Sync + 'static,
    F: Fn(&T, &mut RequestContext) -> Result<(), Error> + Send + Sync + 'static,
{
    Arc::new(move |object: &BeanObject, ctx: &mut RequestContext| {
        hook(downcast_controller::<T>(object)?, ctx)
    })
}

enum Injected {
    Bean(BeanInstance),
    Group(Vec<BeanInstance>),
}

/// Dependencies resolved for one component, handed to its factory
pub struct Wiring {
    component: String,
    injected: HashMap<&'static str, Injected>,
}

impl Wiring {
    pub(crate) fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            injected: HashMap::new(),
        }
    }

    pub(crate) fn insert_bean(&mut self, site: &'static str, bean: BeanInstance) {
        self.injected.insert(site, Injected::Bean(bean));
    }

    pub(crate) fn insert_group(&mut self, site: &'static str, beans: Vec<BeanInstance>) {
        self.injected.insert(site, Injected::Group(beans));
    }

    /// Identifier of the component being built
    pub fn component(&self) -> &str {
        &self.component
    }

    /// The raw bean injected at `site`
    pub fn instance(&self, site: &str) -> Result<&BeanInstance, Error> {
        match self.injected.get(site) {
            Some(Injected::Bean(bean)) => Ok(bean),
            Some(Injected::Group(_)) => Err(self.mismatch(site, "a single bean", "a group")),
            None => Err(self.missing(site)),
        }
    }

    /// Concrete bean injected at `site`
    pub fn bean<D: Send + Sync + 'static>(&self, site: &str) -> Result<Arc<D>, Error> {
        let bean = self.instance(site)?;
        bean.downcast::<D>()
            .ok_or_else(|| self.mismatch(site, std::any::type_name::<D>(), bean.type_name()))
    }

    /// Bean injected at `site`, viewed through the abstract type `I`
    pub fn interface<I: ?Sized + Send + Sync + 'static>(&self, site: &str) -> Result<Arc<I>, Error> {
        let bean = self.instance(site)?;
        bean.cast::<I>()
            .ok_or_else(|| self.mismatch(site, std::any::type_name::<I>(), bean.type_name()))
    }

    /// Group members injected at `site`
    pub fn group(&self, site: &str) -> Result<Vec<BeanInstance>, Error> {
        match self.injected.get(site) {
            Some(Injected::Group(beans)) => Ok(beans.clone()),
            Some(Injected::Bean(_)) => Err(self.mismatch(site, "a group", "a single bean")),
            None => Err(self.missing(site)),
        }
    }

    /// Group members injected at `site`, each viewed through `I`
    pub fn group_of<I: ?Sized + Send + Sync + 'static>(&self, site: &str) -> Result<Vec<Arc<I>>, Error> {
        self.group(site)?
            .iter()
            .map(|bean| {
                bean.cast::<I>()
                    .ok_or_else(|| self.mismatch(site, std::any::type_name::<I>(), bean.type_name()))
            })
            .collect()
    }

    fn missing(&self, site: &str) -> Error {
        Error::DependencyInjection(format!(
            "{} has no injection site named '{}'",
            self.component, site
        ))
    }

    fn mismatch(&self, site: &str, expected: &str, found: &str) -> Error {
        Error::DependencyInjection(format!(
            "{}.{}: expected {}, found {}",
            self.component, site, expected, found
        ))
    }
}

/// Entry in the compile-time component registry
pub struct ComponentRegistration {
    pub describe: fn() -> ComponentDescriptor,
}

inventory::collect!(ComponentRegistration);

/// Register a descriptor function with the compile-time component registry.
///
/// ```ignore
/// fn item_service() -> ComponentDescriptor {
///     ComponentDescriptor::service::<ItemService>().build(|_| Ok(ItemService))
/// }
/// register_component!(item_service);
/// ```
#[macro_export]
macro_rules! register_component {
    ($describe:path) => {
        $crate::inventory::submit! {
            $crate::metadata::ComponentRegistration { describe: $describe }
        }
    };
}

/// Read-only index of every component known at startup
#[derive(Debug, Default)]
pub struct MetadataIndex {
    components: Vec<Arc<ComponentDescriptor>>,
    by_id: HashMap<String, usize>,
}

impl MetadataIndex {
    /// Index a set of descriptors. Identifiers must be unique.
    pub fn scan<I>(descriptors: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = ComponentDescriptor>,
    {
        let mut index = Self::default();
        for descriptor in descriptors {
            if index.by_id.contains_key(descriptor.id()) {
                return Err(Error::DuplicateComponent(descriptor.id().to_string()));
            }
            debug!(
                component = descriptor.id(),
                kind = ?descriptor.kind(),
                sites = descriptor.sites().len(),
                routes = descriptor.routes().len(),
                "Indexed component"
            );
            index
                .by_id
                .insert(descriptor.id().to_string(), index.components.len());
            index.components.push(Arc::new(descriptor));
        }
        Ok(index)
    }

    /// Index every descriptor submitted through [`register_component!`].
    ///
    /// Registry iteration order is unspecified, so descriptors are indexed in
    /// identifier order.
    pub fn scan_registered() -> Result<Self, Error> {
        let mut descriptors: Vec<ComponentDescriptor> = inventory::iter::<ComponentRegistration>
            .into_iter()
            .map(|registration| (registration.describe)())
            .collect();
        descriptors.sort_by(|a, b| a.id().cmp(b.id()));
        Self::scan(descriptors)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn component(&self, id: &str) -> Option<&Arc<ComponentDescriptor>> {
        self.by_id.get(id).map(|&slot| &self.components[slot])
    }

    /// Look a component up by its Rust type name
    pub fn find_by_type_name(&self, type_name: &str) -> Option<&Arc<ComponentDescriptor>> {
        self.components
            .iter()
            .find(|descriptor| descriptor.type_name() == type_name)
    }

    /// Components in scan order
    pub fn components(&self) -> impl Iterator<Item = &Arc<ComponentDescriptor>> {
        self.components.iter()
    }

    /// Controllers in scan order
    pub fn controllers(&self) -> impl Iterator<Item = &Arc<ComponentDescriptor>> {
        self.components
            .iter()
            .filter(|descriptor| descriptor.is_controller())
    }

    /// Every route declaration with its owning controller, in declaration order
    pub fn route_methods(&self) -> impl Iterator<Item = (&Arc<ComponentDescriptor>, &RouteDeclaration)> {
        self.controllers()
            .flat_map(|controller| controller.routes().iter().map(move |route| (controller, route)))
    }
}
