use tracegen::{ModuleId, ModuleNode};

fn segs(path: &[&str]) -> Vec<String> {
    path.iter().map(|s| s.to_string()).collect()
}

#[test]
fn sibling_leaves_share_one_prefix_chain() {
    let mut root = ModuleNode::default();
    root.attach(&segs(&["enc", "block"]), "fc", ModuleId(0));
    root.attach(&segs(&["enc", "block"]), "act", ModuleId(1));

    assert_eq!(root.children().count(), 1);
    let enc = root.submodule("enc").unwrap();
    assert_eq!(enc.children().count(), 1);
    let block = root.submodule("enc.block").unwrap();
    assert_eq!(block.children().count(), 2);

    assert_eq!(
        root.named_modules(),
        vec![
            ("enc.block.act".to_string(), ModuleId(1)),
            ("enc.block.fc".to_string(), ModuleId(0)),
        ]
    );
}

#[test]
fn placeholder_is_promoted_without_losing_children() {
    let mut root = ModuleNode::default();
    root.attach(&segs(&["enc"]), "fc", ModuleId(0));
    // `enc` was created as an empty placeholder; attaching a module there
    // fills the slot and keeps the subtree.
    root.attach(&[], "enc", ModuleId(1));

    let enc = root.submodule("enc").unwrap();
    assert_eq!(enc.module(), Some(ModuleId(1)));
    assert_eq!(
        enc.submodule("fc").and_then(|n| n.module()),
        Some(ModuleId(0))
    );
}

#[test]
fn missing_paths_resolve_to_none() {
    let mut root = ModuleNode::default();
    root.attach(&segs(&["enc"]), "fc", ModuleId(0));

    assert!(root.submodule("enc.fc").is_some());
    assert!(root.submodule("enc.fc.weight").is_none());
    assert!(root.submodule("dec").is_none());
    assert_eq!(root.submodule("enc").unwrap().module(), None);
}

#[test]
fn reattaching_the_same_leaf_is_idempotent() {
    let mut root = ModuleNode::default();
    root.attach(&segs(&["enc"]), "fc", ModuleId(0));
    let before = root.clone();
    root.attach(&segs(&["enc"]), "fc", ModuleId(0));
    assert_eq!(root, before);
}
