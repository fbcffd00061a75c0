//! Integration Tests for Stores
//!
//! These tests drive stores through a registry the way an application
//! would: write, drain the scheduler, then check what watchers and getters
//! observed.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use lattice_store::{BatchStatus, State, StoreConfig, StoreError, StoreRegistry};

fn count_of(state: &State) -> i64 {
    state.get("count").and_then(Value::as_i64).unwrap_or(0)
}

/// Test that writes in one tick produce exactly one commit.
#[test]
fn writes_in_one_tick_commit_once() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(StoreConfig::new("counter", || json!({ "count": 0 })))
        .unwrap()
        .use_store()
        .unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_clone = calls.clone();
    store.subscribe(move |old, new| {
        calls_clone.lock().push((old.to_value(), new.to_value()));
    });

    store.state().set("count", json!(1)).unwrap();
    store.state().set("count", json!(2)).unwrap();

    // Nothing is delivered before the scheduler drains
    assert!(calls.lock().is_empty());
    assert_eq!(store.state().status(), BatchStatus::Pending);

    registry.run_until_idle();

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], (json!({"count": 0}), json!({"count": 2})));
    assert_eq!(store.state().commit_count(), 1);
}

/// Test that a patch commits once and only notifies watchers of written fields.
#[test]
fn patch_notifies_changed_fields_only() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(StoreConfig::new("pair", || json!({ "a": 1, "b": 2, "c": 3 })))
        .unwrap()
        .use_store()
        .unwrap();

    let global = Arc::new(AtomicI32::new(0));
    let global_clone = global.clone();
    store.subscribe(move |_, _| {
        global_clone.fetch_add(1, Ordering::SeqCst);
    });

    let seen_a = Arc::new(Mutex::new(Vec::new()));
    let seen_a_clone = seen_a.clone();
    store.subscribe_key("a", move |old, new| {
        seen_a_clone.lock().push((old.clone(), new.clone()));
    });

    let seen_c = Arc::new(AtomicI32::new(0));
    let seen_c_clone = seen_c.clone();
    store.subscribe_key("c", move |_, _| {
        seen_c_clone.fetch_add(1, Ordering::SeqCst);
    });

    store.patch(json!({ "a": 10, "b": 20 })).unwrap();
    registry.run_until_idle();

    assert_eq!(global.load(Ordering::SeqCst), 1);
    assert_eq!(*seen_a.lock(), vec![(json!(1), json!(10))]);
    assert_eq!(seen_c.load(Ordering::SeqCst), 0);
}

/// Test that a patch with an unknown key writes nothing.
#[test]
fn failed_patch_leaves_state_untouched() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(StoreConfig::new("pair", || json!({ "a": 1, "b": 2 })))
        .unwrap()
        .use_store()
        .unwrap();

    let calls = Arc::new(AtomicI32::new(0));
    let calls_clone = calls.clone();
    store.subscribe(move |_, _| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    });

    let err = store.patch(json!({ "a": 5, "missing": 1 })).unwrap_err();
    assert_eq!(err.to_string(), "state does not include property `missing`");

    registry.run_until_idle();
    assert_eq!(store.snapshot(), json!({ "a": 1, "b": 2 }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Test that reset restores a deep copy of the initial state every time.
#[test]
fn reset_restores_fresh_copies() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(StoreConfig::new("todo", || {
            json!({ "items": ["a"], "filter": { "done": false } })
        }))
        .unwrap()
        .use_store()
        .unwrap();

    store
        .state()
        .update("items", |items| {
            if let Some(items) = items.as_array_mut() {
                items.push(json!("b"));
            }
        })
        .unwrap();
    store.patch(json!({ "filter": { "done": true } })).unwrap();
    registry.run_until_idle();

    store.reset().unwrap();
    registry.run_until_idle();
    assert_eq!(store.snapshot(), json!({ "items": ["a"], "filter": { "done": false } }));

    // Mutating after a reset must not leak into the next reset
    store
        .state()
        .update("items", |items| items[0] = json!("changed"))
        .unwrap();
    registry.run_until_idle();

    store.reset().unwrap();
    registry.run_until_idle();
    assert_eq!(store.state().get("items"), Some(json!(["a"])));
    assert_eq!(store.initial_state(), json!({ "items": ["a"], "filter": { "done": false } }));
}

/// Test that resetting selected fields leaves the others alone.
#[test]
fn reset_fields_is_selective() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(StoreConfig::new("form", || json!({ "name": "", "age": 0 })))
        .unwrap()
        .use_store()
        .unwrap();

    let changed = Arc::new(Mutex::new(Vec::new()));
    let changed_clone = changed.clone();
    store.subscribe_key("age", move |_, new| {
        changed_clone.lock().push(new.clone());
    });

    store.patch(json!({ "name": "Ada", "age": 36 })).unwrap();
    registry.run_until_idle();

    store.reset_fields(["age"]).unwrap();
    registry.run_until_idle();

    assert_eq!(store.snapshot(), json!({ "name": "Ada", "age": 0 }));
    assert_eq!(*changed.lock(), vec![json!(36), json!(0)]);

    let err = store.reset_fields(["nickname"]).unwrap_err();
    assert!(matches!(err, StoreError::UnknownField { .. }));
}

/// Test that a getter computes at most once between commits.
#[test]
fn getter_computes_once_per_commit() {
    let computations = Arc::new(AtomicI32::new(0));
    let computations_clone = computations.clone();

    let registry = StoreRegistry::new();
    let store = registry
        .define(
            StoreConfig::new("counter", || json!({ "count": 2 }))
                .getter("double", move |state, _| {
                    computations_clone.fetch_add(1, Ordering::SeqCst);
                    json!(count_of(state) * 2)
                })
                .getter("quadruple", |_, store| {
                    let double = store.getter("double").unwrap_or(Value::Null);
                    json!(double.as_i64().unwrap_or(0) * 2)
                }),
        )
        .unwrap()
        .use_store()
        .unwrap();

    assert_eq!(store.getter("double").unwrap(), json!(4));
    assert_eq!(store.getter("double").unwrap(), json!(4));
    assert_eq!(store.getter("quadruple").unwrap(), json!(8));
    assert_eq!(computations.load(Ordering::SeqCst), 1);

    store.state().set("count", json!(5)).unwrap();

    // Still cached until the commit lands
    assert_eq!(store.getter("double").unwrap(), json!(4));

    registry.run_until_idle();
    assert_eq!(store.getter("double").unwrap(), json!(10));
    assert_eq!(store.getter_as::<i64>("quadruple").unwrap(), 20);
    assert_eq!(computations.load(Ordering::SeqCst), 2);
}

/// Test that a getter which reads itself reports a cycle.
#[test]
fn self_referencing_getter_is_a_cycle() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(
            StoreConfig::new("loop", || json!({ "count": 0 })).getter("me", |_, store| {
                match store.getter("me") {
                    Err(StoreError::GetterCycle(name)) => json!(format!("cycle at {name}")),
                    _ => Value::Null,
                }
            }),
        )
        .unwrap()
        .use_store()
        .unwrap();

    assert_eq!(store.getter("me").unwrap(), json!("cycle at me"));
}

/// Test that unsubscribing stops notifications and can be repeated.
#[test]
fn unsubscribe_is_idempotent() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(StoreConfig::new("counter", || json!({ "count": 0 })))
        .unwrap()
        .use_store()
        .unwrap();

    let global = Arc::new(AtomicI32::new(0));
    let global_clone = global.clone();
    let global_sub = store.subscribe(move |_, _| {
        global_clone.fetch_add(1, Ordering::SeqCst);
    });

    let keyed = Arc::new(AtomicI32::new(0));
    let keyed_clone = keyed.clone();
    let key_sub = store.subscribe_key("count", move |_, _| {
        keyed_clone.fetch_add(1, Ordering::SeqCst);
    });

    store.state().set("count", json!(1)).unwrap();
    registry.run_until_idle();

    global_sub.unsubscribe();
    global_sub.unsubscribe();
    key_sub.unsubscribe();
    assert!(!global_sub.is_active());
    assert_eq!(store.watchers().global_count(), 0);
    assert_eq!(store.watchers().key_count("count"), 0);

    store.state().set("count", json!(2)).unwrap();
    registry.run_until_idle();

    assert_eq!(global.load(Ordering::SeqCst), 1);
    assert_eq!(keyed.load(Ordering::SeqCst), 1);
}

/// Test that dropping a subscription handle keeps the watcher alive.
#[test]
fn dropped_subscription_keeps_watching() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(StoreConfig::new("counter", || json!({ "count": 0 })))
        .unwrap()
        .use_store()
        .unwrap();

    let calls = Arc::new(AtomicI32::new(0));
    let calls_clone = calls.clone();
    drop(store.subscribe(move |_, _| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    }));

    store.state().set("count", json!(1)).unwrap();
    registry.run_until_idle();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test that one definition yields one shared instance and ids stay unique.
#[test]
fn definitions_share_one_instance() {
    let registry = StoreRegistry::new();
    let definition = registry
        .define(StoreConfig::new("counter", || json!({ "count": 0 })))
        .unwrap();

    let first = definition.use_store().unwrap();
    let second = definition.use_store().unwrap();
    first.state().set("count", json!(3)).unwrap();

    assert_eq!(second.state().get("count"), Some(json!(3)));
    assert!(registry.get("counter").is_some());

    let err = registry
        .define(StoreConfig::new("counter", || json!({})))
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateStore(id) if id == "counter"));
}

/// Test that the store never aliases data the factory closed over.
#[test]
fn store_is_isolated_from_factory_data() {
    let source = Arc::new(Mutex::new(json!({ "list": [1, 2] })));
    let source_clone = source.clone();

    let registry = StoreRegistry::new();
    let store = registry
        .define(StoreConfig::new("isolated", move || source_clone.lock().clone()))
        .unwrap()
        .use_store()
        .unwrap();

    source.lock()["list"] = json!([9]);
    assert_eq!(store.state().get("list"), Some(json!([1, 2])));

    store
        .state()
        .update("list", |list| list[0] = json!(100))
        .unwrap();
    assert_eq!(*source.lock(), json!({ "list": [9] }));
}

/// Test that actions receive the store and their writes batch like any other.
#[test]
fn actions_write_through_the_store() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(
            StoreConfig::new("counter", || json!({ "count": 0 })).action("add", |store, by| {
                let by = by
                    .as_i64()
                    .ok_or_else(|| StoreError::action("add", "payload must be an integer"))?;
                store
                    .state()
                    .update("count", |count| *count = json!(count.as_i64().unwrap_or(0) + by))?;
                Ok(())
            }),
        )
        .unwrap()
        .use_store()
        .unwrap();

    let commits = Arc::new(AtomicI32::new(0));
    let commits_clone = commits.clone();
    store.subscribe(move |_, _| {
        commits_clone.fetch_add(1, Ordering::SeqCst);
    });

    store.dispatch("add", json!(2)).unwrap();
    store.dispatch("add", json!(3)).unwrap();
    registry.run_until_idle();

    assert_eq!(store.state().get("count"), Some(json!(5)));
    assert_eq!(commits.load(Ordering::SeqCst), 1);

    let err = store.dispatch("add", json!("three")).unwrap_err();
    assert_eq!(err.to_string(), "action `add` failed: payload must be an integer");
}

/// Test that stores on one registry commit together and independently.
#[test]
fn stores_share_the_registry_scheduler() {
    let registry = StoreRegistry::new();
    let a = registry
        .define(StoreConfig::new("a", || json!({ "n": 0 })))
        .unwrap()
        .use_store()
        .unwrap();
    let b = registry
        .define(StoreConfig::new("b", || json!({ "n": 0 })))
        .unwrap()
        .use_store()
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for store in [&a, &b] {
        let seen = seen.clone();
        let id = store.id().to_string();
        store.subscribe(move |_, new| {
            seen.lock().push((id.clone(), new.to_value()));
        });
    }

    a.state().set("n", json!(1)).unwrap();
    b.state().set("n", json!(2)).unwrap();
    a.state().set("n", json!(3)).unwrap();

    assert_eq!(registry.scheduler().pending(), 2);
    registry.run_until_idle();

    assert_eq!(
        *seen.lock(),
        vec![
            ("a".to_string(), json!({ "n": 3 })),
            ("b".to_string(), json!({ "n": 2 })),
        ]
    );
}

/// Test that a watcher writing to its own store starts a new batch.
#[test]
fn watcher_writes_start_a_new_batch() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(StoreConfig::new("echo", || json!({ "input": 0, "echo": 0 })))
        .unwrap()
        .use_store()
        .unwrap();

    let handle = store.clone();
    store.subscribe_key("input", move |_, new| {
        handle.state().set("echo", new.clone()).unwrap();
    });

    let commits = Arc::new(Mutex::new(Vec::new()));
    let commits_clone = commits.clone();
    store.subscribe(move |_, new| {
        commits_clone.lock().push(new.to_value());
    });

    store.state().set("input", json!(7)).unwrap();
    registry.run_until_idle();

    assert_eq!(
        *commits.lock(),
        vec![
            json!({ "input": 7, "echo": 0 }),
            json!({ "input": 7, "echo": 7 }),
        ]
    );
}

/// Test typed reads and writes through serde.
#[test]
fn typed_state_access() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    let registry = StoreRegistry::new();
    let store = registry
        .define(StoreConfig::new("profile", || Profile {
            name: "guest".into(),
            visits: 0,
        }))
        .unwrap()
        .use_store()
        .unwrap();

    store
        .patch_with(&Profile {
            name: "ada".into(),
            visits: 1,
        })
        .unwrap();

    let profile: Profile = store.state_as().unwrap();
    assert_eq!(
        profile,
        Profile {
            name: "ada".into(),
            visits: 1
        }
    );
}

/// Test that watcher changes made during a commit apply from the next commit.
#[test]
fn watcher_changes_apply_from_the_next_commit() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(StoreConfig::new("counter", || json!({ "count": 0 })))
        .unwrap()
        .use_store()
        .unwrap();

    // A field watcher that a global watcher removes mid-commit
    let removed_calls = Arc::new(AtomicI32::new(0));
    let removed_clone = removed_calls.clone();
    let removed = Arc::new(store.subscribe_key("count", move |_, _| {
        removed_clone.fetch_add(1, Ordering::SeqCst);
    }));

    // A field watcher that a global watcher adds mid-commit
    let added_calls = Arc::new(AtomicI32::new(0));
    let added_subs = Arc::new(Mutex::new(Vec::new()));

    let handle = store.clone();
    let added_clone = added_calls.clone();
    let subs = added_subs.clone();
    store.subscribe(move |_, _| {
        removed.unsubscribe();
        let mut subs = subs.lock();
        if subs.is_empty() {
            let added = added_clone.clone();
            subs.push(handle.subscribe_key("count", move |_, _| {
                added.fetch_add(1, Ordering::SeqCst);
            }));
        }
    });

    store.state().set("count", json!(1)).unwrap();
    registry.run_until_idle();

    assert_eq!(removed_calls.load(Ordering::SeqCst), 1);
    assert_eq!(added_calls.load(Ordering::SeqCst), 0);

    store.state().set("count", json!(2)).unwrap();
    registry.run_until_idle();

    assert_eq!(removed_calls.load(Ordering::SeqCst), 1);
    assert_eq!(added_calls.load(Ordering::SeqCst), 1);
}

/// Test that a getter writing state opens a batch like any other write.
#[test]
fn getter_writes_open_a_batch() {
    let registry = StoreRegistry::new();
    let store = registry
        .define(
            StoreConfig::new("audit", || json!({ "count": 0, "reads": 0 })).getter(
                "count",
                |state, store| {
                    let reads = state.get("reads").and_then(Value::as_i64).unwrap_or(0);
                    store.state().set("reads", json!(reads + 1)).unwrap_or(false);
                    json!(count_of(state))
                },
            ),
        )
        .unwrap()
        .use_store()
        .unwrap();

    let commits = Arc::new(AtomicI32::new(0));
    let commits_clone = commits.clone();
    store.subscribe(move |_, _| {
        commits_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(store.getter("count").unwrap(), json!(0));

    // The write is visible at once and commits on the next drain
    assert_eq!(store.state().get("reads"), Some(json!(1)));
    assert_eq!(store.state().status(), BatchStatus::Pending);

    registry.run_until_idle();
    assert_eq!(commits.load(Ordering::SeqCst), 1);
    assert_eq!(store.state().get("reads"), Some(json!(1)));
}
