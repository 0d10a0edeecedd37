//! Sessions from one factory run independently on separate threads.

use std::thread;

use kestrel::prelude::*;

use super::{big_ratio, factory, ratio};

#[test]
fn sessions_run_in_parallel() {
    let factory = factory(vec![big_ratio()]);
    let results: Vec<(usize, usize)> = thread::scope(|scope| {
        let handles: Vec<_> = (1..=4)
            .map(|n| {
                let factory = factory.clone();
                scope.spawn(move || {
                    let mut session = factory.create_session().unwrap();
                    for i in 0..n {
                        session.insert("Ratio", ratio(10 + i, 1)).unwrap();
                    }
                    let fired = session.fire().unwrap();
                    (fired, session.query("Big").len())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(results, vec![(1, 1), (2, 2), (3, 3), (4, 4)]);
}

#[test]
fn sessions_can_move_between_threads() {
    let mut session = factory(vec![big_ratio()]).create_session().unwrap();
    session.insert("Ratio", ratio(4, 1)).unwrap();
    let session = thread::spawn(move || {
        session.fire().unwrap();
        session
    })
    .join()
    .unwrap();
    assert_eq!(session.query("Big").len(), 1);
}
