//! Query surface, cache behavior, and event-driven invalidation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;
use warden_core::error::WardenError;
use warden_core::events::{ChangeKind, DomainEvent};
use warden_core::models::action::ActionSet;
use warden_core::models::asset::CreateAsset;
use warden_core::models::grant::CreateGrant;
use warden_core::models::node::Node;
use warden_core::models::tenant::CreateTenant;
use warden_core::models::user::CreateUser;
use warden_core::repository::{
    AssetRepository, GrantRepository, NodeRepository, TenantRepository, UserRepository,
};
use warden_db::repository::{
    SurrealAssetRepository, SurrealGrantRepository, SurrealGroupRepository,
    SurrealNodeRepository, SurrealTenantRepository, SurrealUserRepository,
};
use warden_engine::amount::AmountMaintainer;
use warden_engine::invalidate::{
    EventBus, ExpirySweeper, InvalidationController, MemoryViewCache, ViewCache,
};
use warden_engine::lock::LocalMutexProvider;
use warden_engine::query::PermQueryService;
use warden_engine::resolve::NodeFrom;

type QueryService = PermQueryService<
    SurrealGrantRepository<Db>,
    SurrealGroupRepository<Db>,
    SurrealNodeRepository<Db>,
    SurrealAssetRepository<Db>,
    MemoryViewCache,
>;

struct Fixture {
    db: Surreal<Db>,
    tenant_id: Uuid,
    user_id: Uuid,
    cache: Arc<MemoryViewCache>,
    // [root, c1, c2, gc] = 1, 1:1, 1:2, 1:1:1
    nodes: Vec<Node>,
}

impl Fixture {
    fn service(&self) -> QueryService {
        PermQueryService::new(
            SurrealGrantRepository::new(self.db.clone()),
            SurrealGroupRepository::new(self.db.clone()),
            SurrealNodeRepository::new(self.db.clone()),
            SurrealAssetRepository::new(self.db.clone()),
            self.cache.clone(),
        )
    }

    fn controller(
        &self,
    ) -> Arc<
        InvalidationController<
            SurrealGrantRepository<Db>,
            SurrealGroupRepository<Db>,
            SurrealNodeRepository<Db>,
            MemoryViewCache,
        >,
    > {
        Arc::new(InvalidationController::new(
            SurrealGrantRepository::new(self.db.clone()),
            SurrealGroupRepository::new(self.db.clone()),
            SurrealNodeRepository::new(self.db.clone()),
            self.cache.clone(),
        ))
    }

    async fn asset_on(&self, name: &str, node_key: &str) -> Uuid {
        let asset = SurrealAssetRepository::new(self.db.clone())
            .create(CreateAsset {
                tenant_id: self.tenant_id,
                name: name.into(),
                address: format!("{name}.internal"),
                platform: "linux".into(),
                comment: String::new(),
            })
            .await
            .unwrap();
        AmountMaintainer::new(
            SurrealNodeRepository::new(self.db.clone()),
            SurrealAssetRepository::new(self.db.clone()),
            LocalMutexProvider::new(),
        )
        .apply_asset_nodes_change(
            self.tenant_id,
            asset.id,
            vec![node_key.into()],
            ChangeKind::Add,
        )
        .await
        .unwrap();
        asset.id
    }

    async fn grant(&self, input: CreateGrant) -> Uuid {
        SurrealGrantRepository::new(self.db.clone())
            .create(input)
            .await
            .unwrap()
            .id
    }

    fn grant_input(&self, name: &str) -> CreateGrant {
        let now = Utc::now();
        CreateGrant {
            tenant_id: self.tenant_id,
            name: name.into(),
            user_ids: vec![self.user_id],
            group_ids: vec![],
            node_ids: vec![],
            asset_ids: vec![],
            accounts: vec!["@ALL".into()],
            actions: ActionSet::CONNECT,
            date_start: now - Duration::hours(1),
            date_expired: now + Duration::days(7),
            is_active: true,
        }
    }
}

async fn setup() -> Fixture {
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
    let user = SurrealUserRepository::new(db.clone())
        .create(CreateUser {
            tenant_id: tenant.id,
            username: "alice".into(),
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

    Fixture {
        db,
        tenant_id: tenant.id,
        user_id: user.id,
        cache: Arc::new(MemoryViewCache::new()),
        nodes: vec![root, c1, c2, gc],
    }
}

#[tokio::test]
async fn overlapping_grants_union_actions_with_soonest_expiry() {
    let fx = setup().await;
    let asset = fx.asset_on("a", "1:1:1").await;
    let now = Utc::now();

    // One grant reaches the asset through the node tree, the other
    // directly; they differ in actions and expiry.
    let mut connect = fx.grant_input("connect");
    connect.node_ids = vec![fx.nodes[1].id];
    connect.date_expired = now + Duration::days(30);
    fx.grant(connect).await;

    let mut upload = fx.grant_input("upload");
    upload.asset_ids = vec![asset];
    upload.actions = ActionSet::UPLOAD_FILE;
    upload.date_expired = now + Duration::days(2);
    let soonest = (now + Duration::days(2)).timestamp();
    fx.grant(upload).await;

    let decision = fx
        .service()
        .validate_permission(fx.tenant_id, fx.user_id, asset, "root", ActionSet::CONNECT)
        .await
        .unwrap();

    assert!(decision.allowed);
    assert_eq!(decision.actions, ActionSet::CONNECT | ActionSet::UPLOAD_FILE);
    assert_eq!(decision.expire_at, Some(soonest));

    // An action neither grant allows is denied, actions still reported.
    let denied = fx
        .service()
        .validate_permission(fx.tenant_id, fx.user_id, asset, "root", ActionSet::DELETE)
        .await
        .unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.actions, ActionSet::CONNECT | ActionSet::UPLOAD_FILE);
}

#[tokio::test]
async fn account_must_match_unless_all_alias() {
    let fx = setup().await;
    let asset = fx.asset_on("a", "1:2").await;

    let mut g = fx.grant_input("named-account");
    g.asset_ids = vec![asset];
    g.accounts = vec!["deploy".into()];
    fx.grant(g).await;

    let service = fx.service();
    let allowed = service
        .validate_permission(fx.tenant_id, fx.user_id, asset, "deploy", ActionSet::CONNECT)
        .await
        .unwrap();
    assert!(allowed.allowed);

    let denied = service
        .validate_permission(fx.tenant_id, fx.user_id, asset, "root", ActionSet::CONNECT)
        .await
        .unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.expire_at, None);
}

#[tokio::test]
async fn expired_grant_denies() {
    let fx = setup().await;
    let asset = fx.asset_on("a", "1:2").await;

    let mut g = fx.grant_input("expired");
    g.asset_ids = vec![asset];
    g.date_start = Utc::now() - Duration::days(2);
    g.date_expired = Utc::now() - Duration::days(1);
    fx.grant(g).await;

    let decision = fx
        .service()
        .validate_permission(fx.tenant_id, fx.user_id, asset, "root", ActionSet::CONNECT)
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert!(decision.actions.is_empty());
}

#[tokio::test]
async fn missing_asset_fails_closed() {
    let fx = setup().await;
    let err = fx
        .service()
        .validate_permission(
            fx.tenant_id,
            fx.user_id,
            Uuid::new_v4(),
            "root",
            ActionSet::CONNECT,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WardenError::NotFound { .. }));
}

#[tokio::test]
async fn authorized_ids_are_cached_until_invalidated() {
    let fx = setup().await;
    let asset = fx.asset_on("a", "1:1").await;
    let mut g = fx.grant_input("g");
    g.node_ids = vec![fx.nodes[1].id];
    let grant_id = fx.grant(g).await;

    let service = fx.service();
    let ids = service
        .get_authorized_asset_ids(fx.tenant_id, fx.user_id)
        .await
        .unwrap();
    assert_eq!(ids, vec![asset]);
    assert!(fx.cache.get(fx.tenant_id, fx.user_id).is_some());

    // Deleting the grant without invalidation still serves the stale view.
    SurrealGrantRepository::new(fx.db.clone())
        .delete(fx.tenant_id, grant_id)
        .await
        .unwrap();
    let stale = service
        .get_authorized_asset_ids(fx.tenant_id, fx.user_id)
        .await
        .unwrap();
    assert_eq!(stale, vec![asset]);

    // The controller handles the deletion event; next read re-resolves.
    fx.controller()
        .handle(DomainEvent::GrantChanged {
            tenant_id: fx.tenant_id,
            grant_id,
            kind: ChangeKind::Remove,
        })
        .await
        .unwrap();
    let fresh = service
        .get_authorized_asset_ids(fx.tenant_id, fx.user_id)
        .await
        .unwrap();
    assert!(fresh.is_empty());
}

#[tokio::test]
async fn relation_event_invalidates_grant_holders_through_ancestors() {
    let fx = setup().await;
    fx.asset_on("a", "1:1").await;
    let mut g = fx.grant_input("g");
    g.node_ids = vec![fx.nodes[1].id];
    fx.grant(g).await;

    let service = fx.service();
    service
        .get_authorized_asset_ids(fx.tenant_id, fx.user_id)
        .await
        .unwrap();
    assert!(fx.cache.get(fx.tenant_id, fx.user_id).is_some());

    // A relation change on the grandchild node: the grant targets its
    // ancestor "1:1", so the holder's view must go stale.
    fx.controller()
        .handle(DomainEvent::NodeAssetsChanged {
            tenant_id: fx.tenant_id,
            node_id: fx.nodes[3].id,
            asset_ids: vec![Uuid::new_v4()],
            kind: ChangeKind::Add,
        })
        .await
        .unwrap();
    assert!(fx.cache.get(fx.tenant_id, fx.user_id).is_none());
}

#[tokio::test]
async fn event_bus_drives_the_controller() {
    let fx = setup().await;
    fx.cache.put(Arc::new(warden_engine::resolve::ResolvedView {
        tenant_id: fx.tenant_id,
        user_id: fx.user_id,
        asset_ids: Default::default(),
        only_direct_asset_ids: Default::default(),
        nodes: Vec::new(),
        resolved_at: Utc::now(),
    }));

    let (bus, receiver) = EventBus::channel();
    let handle = fx.controller().start(receiver);

    bus.publish(DomainEvent::UserGroupsChanged {
        tenant_id: fx.tenant_id,
        user_id: fx.user_id,
        group_ids: vec![],
        kind: ChangeKind::Remove,
    });
    bus.shutdown();
    handle.await.unwrap();

    assert!(fx.cache.get(fx.tenant_id, fx.user_id).is_none());
}

#[tokio::test]
async fn expiry_sweep_invalidates_holders_of_lapsed_grants() {
    let fx = setup().await;
    let now = Utc::now();

    let mut g = fx.grant_input("lapsing");
    g.date_start = now - Duration::days(1);
    g.date_expired = now - Duration::minutes(10);
    fx.grant(g).await;

    fx.cache.put(Arc::new(warden_engine::resolve::ResolvedView {
        tenant_id: fx.tenant_id,
        user_id: fx.user_id,
        asset_ids: Default::default(),
        only_direct_asset_ids: Default::default(),
        nodes: Vec::new(),
        resolved_at: now,
    }));

    let sweeper = ExpirySweeper::new(
        SurrealGrantRepository::new(fx.db.clone()),
        SurrealGroupRepository::new(fx.db.clone()),
        fx.cache.clone(),
    );

    // A window that misses the expiry touches nothing.
    let count = sweeper
        .sweep(now - Duration::minutes(5), now)
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert!(fx.cache.get(fx.tenant_id, fx.user_id).is_some());

    // The covering window invalidates the grant's users.
    let count = sweeper
        .sweep(now - Duration::hours(1), now)
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert!(fx.cache.get(fx.tenant_id, fx.user_id).is_none());
}

#[tokio::test]
async fn node_tree_classification_through_the_service() {
    let fx = setup().await;
    fx.asset_on("deep", "1:1:1").await;
    let direct = fx.asset_on("direct", "1:2").await;

    let mut g = fx.grant_input("g");
    g.node_ids = vec![fx.nodes[1].id];
    g.asset_ids = vec![direct];
    fx.grant(g).await;

    let tree = fx
        .service()
        .get_authorized_node_tree(fx.tenant_id, fx.user_id)
        .await
        .unwrap();
    let by_key: std::collections::HashMap<&str, NodeFrom> =
        tree.iter().map(|n| (n.key.as_str(), n.node_from)).collect();

    assert_eq!(by_key["1:1"], NodeFrom::Granted);
    assert_eq!(by_key["1:2"], NodeFrom::Asset);
    assert_eq!(by_key["1"], NodeFrom::Child);
    assert!(!by_key.contains_key("1:1:1"), "inside granted subtree");
}
