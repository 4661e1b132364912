//! Causal delivery properties of the receive pipeline, driven without any
//! networking so arrival order is fully under the test's control.

use causal_kv::message::ReplicatedWrite;
use causal_kv::model::{Dependency, Version};
use causal_kv::node::CausalNode;

/// Builds the chain a -> b -> c as it would leave datacenter 0: one session
/// writes all three keys, so each write depends on the ones before it.
fn causal_chain() -> Vec<ReplicatedWrite> {
    let mut origin = CausalNode::new(0);
    let session = 1;
    ["a", "b", "c"]
        .iter()
        .enumerate()
        .map(|(i, key)| origin.write(session, key, &format!("{}", i + 1)).replicated)
        .collect()
}

fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut result = Vec::new();
    for (i, &head) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            result.push(tail);
        }
    }
    result
}

#[test]
fn chain_commits_only_after_root_arrives() {
    let chain = causal_chain();
    let (a, b, c) = (&chain[0], &chain[1], &chain[2]);
    assert_eq!(b.dependencies, vec![a.commit_record()]);
    assert_eq!(c.dependencies, vec![a.commit_record(), b.commit_record()]);

    let mut remote = CausalNode::new(2);

    assert!(remote.receive(c.clone()).parked);
    assert!(remote.receive(b.clone()).parked);
    assert_eq!(remote.store().read("b"), None);
    assert_eq!(remote.store().read("c"), None);
    assert!(remote.store().history().is_empty());
    assert_eq!(remote.pending().len(), 2);

    let outcome = remote.receive(a.clone());

    assert_eq!(
        outcome.committed,
        vec![a.commit_record(), b.commit_record(), c.commit_record()]
    );
    assert!(remote.pending().is_empty());
    assert_eq!(remote.store().read("a"), Some("1"));
    assert_eq!(remote.store().read("b"), Some("2"));
    assert_eq!(remote.store().read("c"), Some("3"));
}

#[test]
fn every_arrival_order_converges_to_in_order_state() {
    let chain = causal_chain();

    let mut in_order = CausalNode::new(1);
    for write in &chain {
        in_order.receive(write.clone());
    }
    let expected = in_order.status();

    for order in permutations(&[0, 1, 2]) {
        let mut node = CausalNode::new(1);
        for &index in &order {
            node.receive(chain[index].clone());
        }
        let status = node.status();
        assert_eq!(status.store, expected.store, "order {order:?}");
        assert_eq!(status.clock, expected.clock, "order {order:?}");
        assert!(status.pending.is_empty(), "order {order:?}");
        assert_eq!(
            node.store().history(),
            in_order.store().history(),
            "commits must follow causal order for {order:?}"
        );
    }
}

#[test]
fn no_write_commits_before_its_dependencies() {
    let chain = causal_chain();

    for order in permutations(&[0, 1, 2]) {
        let mut node = CausalNode::new(2);
        for &index in &order {
            let outcome = node.receive(chain[index].clone());
            for record in &outcome.committed {
                let write = chain
                    .iter()
                    .find(|w| &w.commit_record() == record)
                    .expect("committed write comes from the chain");
                let position = |dep: &Dependency| {
                    node.store()
                        .history()
                        .iter()
                        .position(|r| r == dep)
                        .expect("dependency committed")
                };
                let own = position(record);
                for dep in &write.dependencies {
                    assert!(position(dep) < own, "{dep} must commit before {record}");
                }
            }
        }
    }
}

#[test]
fn replicated_clock_rule() {
    let mut node = CausalNode::new(1);
    let session = 9;
    node.write(session, "local", "v");
    assert_eq!(node.store().clock(), 1);

    let near = ReplicatedWrite {
        key: "near".into(),
        value: "v".into(),
        timestamp: 2,
        datacenter_id: 0,
        dependencies: Vec::new(),
    };
    node.receive(near);
    assert_eq!(node.store().clock(), 2);

    let far = ReplicatedWrite {
        key: "far".into(),
        value: "v".into(),
        timestamp: 40,
        datacenter_id: 0,
        dependencies: Vec::new(),
    };
    node.receive(far);
    assert_eq!(node.store().clock(), 40);

    let stale = ReplicatedWrite {
        key: "stale".into(),
        value: "v".into(),
        timestamp: 3,
        datacenter_id: 2,
        dependencies: Vec::new(),
    };
    node.receive(stale);
    assert_eq!(node.store().clock(), 41);
}

#[test]
fn remote_read_becomes_a_dependency_of_the_next_write() {
    let chain = causal_chain();
    let mut middle = CausalNode::new(1);
    middle.receive(chain[0].clone());

    let session = 3;
    assert_eq!(middle.read(session, "a"), Some("1".to_string()));
    let outcome = middle.write(session, "d", "4");
    assert_eq!(
        outcome.replicated.dependencies,
        vec![Dependency::new("a", Version::new(1, 0))]
    );

    // A third datacenter that has not seen `a` must hold `d` back.
    let mut far = CausalNode::new(2);
    assert!(far.receive(outcome.replicated.clone()).parked);
    let drained = far.receive(chain[0].clone());
    assert_eq!(drained.committed.len(), 2);
    assert_eq!(far.store().read("d"), Some("4"));
}
