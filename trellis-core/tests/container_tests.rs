use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use trellis_core::*;

trait Store: Send + Sync {
    fn kind(&self) -> &'static str;
}

struct MemoryStore;
struct DiskStore;

impl Store for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }
}

impl Store for DiskStore {
    fn kind(&self) -> &'static str {
        "disk"
    }
}

struct Repository {
    store: Arc<dyn Store>,
}

fn memory_store() -> ComponentDescriptor {
    ComponentDescriptor::component::<MemoryStore>()
        .implements::<dyn Store>(|store| store as Arc<dyn Store>)
        .build(|_| Ok(MemoryStore))
}

fn disk_store() -> ComponentDescriptor {
    ComponentDescriptor::component::<DiskStore>()
        .implements::<dyn Store>(|store| store as Arc<dyn Store>)
        .build(|_| Ok(DiskStore))
}

fn repository() -> ComponentDescriptor {
    ComponentDescriptor::service::<Repository>()
        .inject_interface::<dyn Store>("store")
        .build(|wiring| {
            Ok(Repository {
                store: wiring.interface::<dyn Store>("store")?,
            })
        })
}

#[test]
fn test_singleton_identity() {
    let index = MetadataIndex::scan([memory_store(), repository()]).unwrap();
    let container = BeanContainer::new(&index).unwrap();
    let id = std::any::type_name::<Repository>();

    let first = container.resolve(id).unwrap();
    let second = container.resolve(id).unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(first.id(), id);
}

#[test]
fn test_single_implementation_is_injected() {
    let index = MetadataIndex::scan([memory_store(), repository()]).unwrap();
    let container = BeanContainer::new(&index).unwrap();

    let repo = container.resolve_as::<Repository>().unwrap();
    assert_eq!(repo.store.kind(), "memory");

    let store = container.resolve_interface::<dyn Store>().unwrap();
    assert_eq!(store.kind(), "memory");
}

#[test]
fn test_two_implementations_are_ambiguous() {
    let index = MetadataIndex::scan([memory_store(), disk_store(), repository()]).unwrap();
    let container = BeanContainer::new(&index).unwrap();

    match container.resolve_as::<Repository>() {
        Err(Error::AmbiguousBean { candidates, .. }) => assert_eq!(candidates.len(), 2),
        other => panic!("expected AmbiguousBean, got {:?}", other.map(|_| ())),
    }
    assert!(matches!(
        container.resolve_interface::<dyn Store>(),
        Err(Error::AmbiguousBean { .. })
    ));
}

#[test]
fn test_no_implementation() {
    let index = MetadataIndex::scan([repository()]).unwrap();
    let container = BeanContainer::new(&index).unwrap();

    assert!(matches!(
        container.resolve_as::<Repository>(),
        Err(Error::NoCompatibleBean(_))
    ));
}

#[test]
fn test_ambiguity_check_disabled_picks_first() {
    let index = MetadataIndex::scan([disk_store(), memory_store(), repository()]).unwrap();
    let container = BeanContainer::builder(&index)
        .options(ContainerOptions {
            autowire_single_impl: false,
        })
        .build()
        .unwrap();

    let repo = container.resolve_as::<Repository>().unwrap();
    assert_eq!(repo.store.kind(), "disk");
}

#[test]
fn test_definition_named_after_interface_wins() {
    let index = MetadataIndex::scan([memory_store(), disk_store(), repository()]).unwrap();
    let container = BeanContainer::builder(&index)
        .explicit([ExplicitBean::new(
            std::any::type_name::<dyn Store>(),
            std::any::type_name::<DiskStore>(),
        )])
        .build()
        .unwrap();

    let repo = container.resolve_as::<Repository>().unwrap();
    assert_eq!(repo.store.kind(), "disk");
}

struct Reporter {
    primary: Arc<MemoryStore>,
}

#[test]
fn test_explicit_definition_and_qualifier() {
    let index = MetadataIndex::scan([
        memory_store(),
        ComponentDescriptor::service::<Reporter>()
            .inject_qualified("primary", "primaryStore")
            .build(|wiring| {
                Ok(Reporter {
                    primary: wiring.bean::<MemoryStore>("primary")?,
                })
            }),
    ])
    .unwrap();

    let container = BeanContainer::builder(&index)
        .explicit([ExplicitBean::new(
            "primaryStore",
            std::any::type_name::<MemoryStore>(),
        )])
        .build()
        .unwrap();

    let ids: Vec<&str> = container.definitions().iter().map(|(id, _)| id).collect();
    assert_eq!(ids[0], "primaryStore");

    let reporter = container.resolve_as::<Reporter>().unwrap();
    let primary = container.resolve("primaryStore").unwrap();
    let scanned = container.resolve_as::<MemoryStore>().unwrap();

    assert!(Arc::ptr_eq(&reporter.primary, &primary.downcast::<MemoryStore>().unwrap()));
    // Separate identifiers own separate singletons
    assert!(!Arc::ptr_eq(&reporter.primary, &scanned));
}

struct Pipeline {
    stages: Vec<Arc<dyn Store>>,
}

#[test]
fn test_group_injection_keeps_order() {
    let index = MetadataIndex::scan([
        memory_store(),
        disk_store(),
        ComponentDescriptor::service::<Pipeline>()
            .inject_group("stages", "stores")
            .build(|wiring| {
                Ok(Pipeline {
                    stages: wiring.group_of::<dyn Store>("stages")?,
                })
            }),
    ])
    .unwrap();

    let container = BeanContainer::builder(&index)
        .group(
            "stores",
            [
                std::any::type_name::<DiskStore>(),
                std::any::type_name::<MemoryStore>(),
            ],
        )
        .build()
        .unwrap();

    let pipeline = container.resolve_as::<Pipeline>().unwrap();
    let kinds: Vec<&str> = pipeline.stages.iter().map(|stage| stage.kind()).collect();
    assert_eq!(kinds, vec!["disk", "memory"]);

    let members = container.resolve_group("stores").unwrap();
    assert_eq!(members.len(), 2);
    assert!(matches!(
        container.resolve_group("missing"),
        Err(Error::UnknownGroup(name)) if name == "missing"
    ));
}

struct Ping;
struct Pong;

fn cycle() -> MetadataIndex {
    MetadataIndex::scan([
        ComponentDescriptor::component::<Ping>()
            .id("ping")
            .inject_qualified("pong", "pong")
            .build(|_| Ok(Ping)),
        ComponentDescriptor::component::<Pong>()
            .id("pong")
            .inject_qualified("ping", "ping")
            .build(|_| Ok(Pong)),
    ])
    .unwrap()
}

#[test]
fn test_cycle_rejected_at_build() {
    let index = cycle();
    let err = BeanContainer::new(&index).unwrap_err();
    assert!(matches!(err, Error::CyclicDependency(path) if path.first() == path.last()));
}

struct SlowA;
struct SlowB;

fn slow(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn slow_pair() -> [ComponentDescriptor; 2] {
    [
        ComponentDescriptor::component::<SlowA>().id("slow_a").build(|_| {
            thread::sleep(slow(100));
            Ok(SlowA)
        }),
        ComponentDescriptor::component::<SlowB>().id("slow_b").build(|_| {
            thread::sleep(slow(100));
            Ok(SlowB)
        }),
    ]
}

#[test]
fn test_cycle_behind_slow_dependencies_rejected_before_workers_start() {
    let [slow_a, slow_b] = slow_pair();
    let index = MetadataIndex::scan([
        slow_a,
        slow_b,
        ComponentDescriptor::component::<Ping>()
            .id("ping")
            .inject_qualified("slow", "slow_a")
            .inject_qualified("pong", "pong")
            .build(|_| Ok(Ping)),
        ComponentDescriptor::component::<Pong>()
            .id("pong")
            .inject_qualified("slow", "slow_b")
            .inject_qualified("ping", "ping")
            .build(|_| Ok(Pong)),
    ])
    .unwrap();

    let err = BeanContainer::new(&index).unwrap_err();
    assert!(matches!(err, Error::CyclicDependency(path) if path.contains(&"ping".to_string())));
}

#[test]
fn test_two_workers_resolve_both_ends_of_a_chain() {
    let [slow_a, slow_b] = slow_pair();
    let index = MetadataIndex::scan([
        slow_a,
        slow_b,
        ComponentDescriptor::component::<Ping>()
            .id("ping")
            .inject_qualified("slow", "slow_a")
            .inject_qualified("pong", "pong")
            .build(|_| Ok(Ping)),
        ComponentDescriptor::component::<Pong>()
            .id("pong")
            .inject_qualified("slow", "slow_b")
            .inject_qualified("a", "slow_a")
            .build(|_| Ok(Pong)),
    ])
    .unwrap();
    let container = Arc::new(BeanContainer::new(&index).unwrap());

    let (tx, rx) = mpsc::channel();
    for id in ["ping", "pong"] {
        let container = container.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            let resolved = container.resolve(id).map(|bean| bean.id().to_string());
            tx.send(resolved).unwrap();
        });
    }
    drop(tx);

    let mut ids: Vec<String> = (0..2)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["ping", "pong"]);
    assert!(container.is_instantiated("slow_a"));
    assert!(container.is_instantiated("slow_b"));
}

static BUILDS: AtomicUsize = AtomicUsize::new(0);

struct Slow;

#[test]
fn test_concurrent_first_resolution_builds_once() {
    let index = MetadataIndex::scan([ComponentDescriptor::component::<Slow>().build(|_| {
        BUILDS.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        Ok(Slow)
    })])
    .unwrap();
    let container = Arc::new(BeanContainer::new(&index).unwrap());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let container = container.clone();
            thread::spawn(move || container.resolve_as::<Slow>().unwrap())
        })
        .collect();
    let beans: Vec<Arc<Slow>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    assert!(beans.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}
