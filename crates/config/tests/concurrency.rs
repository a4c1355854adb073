//! Concurrent writers on a single configuration.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use serde_json::json;
use strata_config::{ConcurrentMapConfiguration, Configuration, LayeredConfiguration};

const THREADS: usize = 8;
const PER_THREAD: usize = 250;

fn hammer(config: Arc<dyn Configuration>) {
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let config = Arc::clone(&config);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    config
                        .add_property("shared", json!(format!("t{t}-{i}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let values = config.get_string_array("shared");
    assert_eq!(values.len(), THREADS * PER_THREAD);
    let distinct: HashSet<&String> = values.iter().collect();
    assert_eq!(distinct.len(), THREADS * PER_THREAD);
}

#[test]
fn concurrent_appends_lose_nothing() {
    hammer(Arc::new(ConcurrentMapConfiguration::new()));
}

#[test]
fn concurrent_appends_through_composite() {
    hammer(Arc::new(LayeredConfiguration::new()));
}

#[test]
fn readers_never_see_torn_values() {
    let config = Arc::new(LayeredConfiguration::new());
    config.set_property("pair", json!("a,a")).unwrap();

    let writer = {
        let config = Arc::clone(&config);
        thread::spawn(move || {
            for i in 0..500 {
                let v = if i % 2 == 0 { "b,b" } else { "a,a" };
                config.set_property("pair", json!(v)).unwrap();
            }
        })
    };
    for _ in 0..500 {
        let list = config.get_string_array("pair");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], list[1]);
    }
    writer.join().unwrap();
}
