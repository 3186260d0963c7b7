//! Integration tests for Asset repository using in-memory SurrealDB.

use surrealdb::Surreal;
use surrealdb::engine::local::Mem;
use uuid::Uuid;
use warden_core::events::ChangeKind;
use warden_core::models::asset::CreateAsset;
use warden_core::models::node::Node;
use warden_core::models::tenant::CreateTenant;
use warden_core::repository::{
    AssetRepository, NodeRepository, Pagination, RelationWrite, TenantRepository,
};
use warden_db::repository::{
    SurrealAssetRepository, SurrealNodeRepository, SurrealTenantRepository,
};

/// Helper: in-memory DB with a tenant and a small tree:
/// `1`, `1:1`, `1:2`, `1:1:1`.
async fn setup() -> (
    Surreal<surrealdb::engine::local::Db>,
    Uuid,
    Vec<Node>, // [root, c1, c2, gc]
) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    warden_db::run_migrations(&db).await.unwrap();

    let tenant_repo = SurrealTenantRepository::new(db.clone());
    let tenant = tenant_repo
        .create(CreateTenant {
            name: "Test Tenant".into(),
            slug: "test-tenant".into(),
        })
        .await
        .unwrap();

    let node_repo = SurrealNodeRepository::new(db.clone());
    let root = node_repo.get_by_key(tenant.id, "1").await.unwrap();
    let c1 = node_repo
        .create_child(tenant.id, root.id, "C1".into())
        .await
        .unwrap();
    let c2 = node_repo
        .create_child(tenant.id, root.id, "C2".into())
        .await
        .unwrap();
    let gc = node_repo
        .create_child(tenant.id, c1.id, "GC".into())
        .await
        .unwrap();

    (db, tenant.id, vec![root, c1, c2, gc])
}

async fn make_asset(db: &Surreal<surrealdb::engine::local::Db>, tenant_id: Uuid, name: &str) -> Uuid {
    let repo = SurrealAssetRepository::new(db.clone());
    repo.create(CreateAsset {
        tenant_id,
        name: name.into(),
        address: format!("{name}.internal"),
        platform: "linux".into(),
        comment: String::new(),
    })
    .await
    .unwrap()
    .id
}

async fn attach(
    db: &Surreal<surrealdb::engine::local::Db>,
    tenant_id: Uuid,
    asset_id: Uuid,
    node: &Node,
) {
    let repo = SurrealNodeRepository::new(db.clone());
    repo.apply_relation_change(
        tenant_id,
        vec![RelationWrite {
            asset_id,
            node_id: node.id,
            node_key: node.key.clone(),
        }],
        ChangeKind::Add,
        vec![],
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn create_and_list_assets() {
    let (db, tenant_id, _) = setup().await;
    let repo = SurrealAssetRepository::new(db.clone());

    for i in 0..4 {
        make_asset(&db, tenant_id, &format!("host-{i}")).await;
    }

    let page = repo
        .list(
            tenant_id,
            Pagination {
                offset: 0,
                limit: 3,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.items.len(), 3);
    assert!(page.items[0].is_active);
}

#[tokio::test]
async fn duplicate_name_rejected() {
    let (db, tenant_id, _) = setup().await;
    let repo = SurrealAssetRepository::new(db.clone());

    make_asset(&db, tenant_id, "same").await;
    let result = repo
        .create(CreateAsset {
            tenant_id,
            name: "same".into(),
            address: "other.internal".into(),
            platform: "linux".into(),
            comment: String::new(),
        })
        .await;
    assert!(result.is_err(), "duplicate asset name should be rejected");
}

#[tokio::test]
async fn existing_relations_matches_both_sides() {
    let (db, tenant_id, nodes) = setup().await;
    let repo = SurrealAssetRepository::new(db.clone());
    let [_, c1, c2, _] = &nodes[..] else {
        unreachable!()
    };

    let a = make_asset(&db, tenant_id, "a").await;
    let b = make_asset(&db, tenant_id, "b").await;
    attach(&db, tenant_id, a, c1).await;
    attach(&db, tenant_id, b, c2).await;

    // Only the (a, c1) pair intersects both id sets.
    let found = repo
        .existing_relations(tenant_id, vec![a, b], vec![c1.id])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].asset_id, a);
    assert_eq!(found[0].node_key, "1:1");

    let none = repo
        .existing_relations(tenant_id, vec![a], vec![c2.id])
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn asset_exists_under_respects_subtree_and_exclusions() {
    let (db, tenant_id, nodes) = setup().await;
    let repo = SurrealAssetRepository::new(db.clone());
    let [_, c1, c2, gc] = &nodes[..] else {
        unreachable!()
    };

    let a = make_asset(&db, tenant_id, "a").await;
    attach(&db, tenant_id, a, gc).await;

    // Found under "1:1" via the grandchild, and under the root.
    assert!(repo
        .asset_exists_under(tenant_id, a, "1:1", vec![])
        .await
        .unwrap());
    assert!(repo
        .asset_exists_under(tenant_id, a, "1", vec![])
        .await
        .unwrap());
    // Not under the sibling subtree.
    assert!(!repo
        .asset_exists_under(tenant_id, a, &c2.key, vec![])
        .await
        .unwrap());
    // Excluding its only node makes it vanish.
    assert!(!repo
        .asset_exists_under(tenant_id, a, &c1.key, vec![gc.id])
        .await
        .unwrap());
}

#[tokio::test]
async fn key_prefix_does_not_leak_across_segments() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    warden_db::run_migrations(&db).await.unwrap();

    let tenant = SurrealTenantRepository::new(db.clone())
        .create(CreateTenant {
            name: "T".into(),
            slug: "t".into(),
        })
        .await
        .unwrap();
    let node_repo = SurrealNodeRepository::new(db.clone());
    let root = node_repo.get_by_key(tenant.id, "1").await.unwrap();

    // Create children 1:1 through 1:12 so "1:1" has sibling "1:12".
    let mut nodes = Vec::new();
    for i in 0..12 {
        nodes.push(
            node_repo
                .create_child(tenant.id, root.id, format!("N{i}"))
                .await
                .unwrap(),
        );
    }
    let n12 = nodes.iter().find(|n| n.key == "1:12").unwrap();

    let asset_repo = SurrealAssetRepository::new(db.clone());
    let a = make_asset(&db, tenant.id, "edge").await;
    attach(&db, tenant.id, a, n12).await;

    // "1:12" is not inside the "1:1" subtree.
    assert!(!asset_repo
        .asset_exists_under(tenant.id, a, "1:1", vec![])
        .await
        .unwrap());
}

#[tokio::test]
async fn assets_present_under_returns_subset() {
    let (db, tenant_id, nodes) = setup().await;
    let repo = SurrealAssetRepository::new(db.clone());
    let [_, c1, c2, _] = &nodes[..] else {
        unreachable!()
    };

    let a = make_asset(&db, tenant_id, "a").await;
    let b = make_asset(&db, tenant_id, "b").await;
    attach(&db, tenant_id, a, c1).await;
    attach(&db, tenant_id, b, c2).await;

    let present = repo
        .assets_present_under(tenant_id, vec![a, b], "1:1", vec![])
        .await
        .unwrap();
    assert_eq!(present, vec![a].into_iter().collect::<Vec<_>>());
}

#[tokio::test]
async fn assets_under_keys_deduplicates() {
    let (db, tenant_id, nodes) = setup().await;
    let repo = SurrealAssetRepository::new(db.clone());
    let [root, c1, _, gc] = &nodes[..] else {
        unreachable!()
    };

    let a = make_asset(&db, tenant_id, "a").await;
    // Attached twice inside overlapping subtrees.
    attach(&db, tenant_id, a, c1).await;
    attach(&db, tenant_id, a, gc).await;

    let under = repo
        .assets_under_keys(tenant_id, vec![root.key.clone(), c1.key.clone()])
        .await
        .unwrap();
    assert_eq!(under, vec![a]);
}

#[tokio::test]
async fn node_keys_of_lists_direct_attachments() {
    let (db, tenant_id, nodes) = setup().await;
    let repo = SurrealAssetRepository::new(db.clone());
    let [_, c1, c2, _] = &nodes[..] else {
        unreachable!()
    };

    let a = make_asset(&db, tenant_id, "a").await;
    attach(&db, tenant_id, a, c1).await;
    attach(&db, tenant_id, a, c2).await;

    let mut keys = repo.node_keys_of(tenant_id, a).await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["1:1".to_string(), "1:2".to_string()]);
}
