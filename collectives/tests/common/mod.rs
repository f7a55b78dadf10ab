//! Shared scaffolding: run one closure per rank over a software switch
//! and collect the per-rank results in rank order.

use litecomm::switch::{SoftSwitch, SwitchComm};

pub fn run_group<F, R>(n: usize, f: F) -> Vec<R>
where
    F: Fn(SwitchComm) -> R + Clone + Send + 'static,
    R: Send + 'static,
{
    let handles: Vec<_> = SoftSwitch::endpoints(n)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}
