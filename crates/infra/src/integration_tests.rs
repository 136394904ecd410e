//! Integration tests for the command pipeline.
//!
//! Tests: Commands → preparation → Eventstore → EventStore
//!
//! Verifies:
//! - concurrent writers on one aggregate produce exactly one winner
//! - unique claims hold under concurrent adds
//! - multi-aggregate batches commit entirely or not at all
//! - cancelled commands leave nothing behind
//! - conflicts are absorbed by the retry wrapper

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use irongate_auth::{Membership, PolicyChecker, Principal, PrincipalId, Role, Scope};

    use irongate_core::{AggregateRef, ExpectedVersion, SequentialIdGenerator};
    use irongate_events::{PendingEvent, SearchQuery, WriteModel};
    use irongate_identity::event::{OrgAdded, OrgChanged};
    use irongate_identity::{Authz, IamCodec, IamEvent, OrgMemberWriteModel, OrgWriteModel};

    use crate::commands::testing::seed_instance;
    use crate::commands::{Commands, HumanUser, OrgAdmin};
    use crate::context::Ctx;
    use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
    use crate::eventstore::Eventstore;
    use crate::retry::RetryPolicy;

    const INSTANCE: &str = "inst-1";

    fn ctx() -> Ctx {
        Ctx::new(INSTANCE, "iam.example", Authz::system())
    }

    /// Commands over `store`, with the `INSTANCE` instance already in it.
    async fn commands_on(store: Arc<dyn EventStore>, retry: RetryPolicy) -> Arc<Commands> {
        let commands = Commands::new(store, Arc::new(SequentialIdGenerator::new("id"))).with_retry(retry);
        seed_instance(&commands, &ctx()).await;
        Arc::new(commands)
    }

    fn org(id: &str) -> AggregateRef {
        AggregateRef::new("org", id, INSTANCE, id)
    }

    fn org_added(id: &str, name: &str) -> PendingEvent<IamEvent> {
        PendingEvent::new(org(id), IamEvent::OrgAdded(OrgAdded { name: name.into() }))
    }

    fn user(username: &str) -> HumanUser {
        HumanUser {
            username: username.into(),
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            email: format!("{username}@mail.example"),
        }
    }

    /// Holds every push for a while before handing it on.
    struct SlowStore {
        inner: InMemoryEventStore,
        delay: Duration,
    }

    #[async_trait]
    impl EventStore for SlowStore {
        async fn filter(&self, query: &SearchQuery) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.filter(query).await
        }

        async fn push(&self, events: Vec<UncommittedEvent>) -> Result<Vec<StoredEvent>, EventStoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.push(events).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pushes_on_one_aggregate_have_one_winner() {
        let es = Arc::new(Eventstore::new(Arc::new(InMemoryEventStore::new()), IamCodec));
        es.push(&ctx(), vec![org_added("o1", "Acme")]).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..8 {
            let es = es.clone();
            handles.push(tokio::spawn(async move {
                let change = PendingEvent::new(
                    org("o1"),
                    IamEvent::OrgChanged(OrgChanged {
                        name: format!("Acme {n}"),
                        old_name: "Acme".into(),
                    }),
                )
                .expect(ExpectedVersion::Exact(1));
                es.push(&ctx(), vec![change]).await
            }));
        }

        let mut won = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(committed) => {
                    won += 1;
                    assert_eq!(committed[0].sequence(), 2);
                }
                Err(err) => assert!(err.is_conflict(), "unexpected error: {err}"),
            }
        }
        assert_eq!(won, 1);

        let model = es
            .filter_to_query_reducer(&ctx(), OrgWriteModel::new(INSTANCE, "o1"))
            .await
            .unwrap();
        assert_eq!(model.base().processed_sequence, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_unique_claims_have_one_winner() {
        let commands = commands_on(Arc::new(InMemoryEventStore::new()), RetryPolicy::none()).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let commands = commands.clone();
            handles.push(tokio::spawn(async move {
                commands.add_org(&ctx(), "Acme", Vec::new()).await
            }));
        }

        let mut won = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(err) => assert!(err.is_already_exists(), "unexpected error: {err}"),
            }
        }
        assert_eq!(won, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_instance_domain_adds_have_one_winner() {
        let commands = commands_on(Arc::new(InMemoryEventStore::new()), RetryPolicy::none()).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let commands = commands.clone();
            handles.push(tokio::spawn(async move {
                commands.add_instance_domain(&ctx(), "a.example").await
            }));
        }

        let results: Vec<_> = join_all(handles).await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| e.is_already_exists())
        );
    }

    async fn join_all<T>(
        handles: Vec<tokio::task::JoinHandle<irongate_core::CommandResult<T>>>,
    ) -> Vec<irongate_core::CommandResult<T>> {
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn retry_absorbs_conflicting_renames() {
        let commands = commands_on(
            Arc::new(InMemoryEventStore::new()),
            RetryPolicy {
                max_retries: 8,
                backoff: Duration::from_millis(1),
            },
        ).await;
        let acme = commands.add_org(&ctx(), "Acme", Vec::new()).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..4 {
            let commands = commands.clone();
            let org_id = acme.id.clone();
            handles.push(tokio::spawn(async move {
                commands.change_org(&ctx(), &org_id, &format!("Acme {n}")).await
            }));
        }
        for result in join_all(handles).await {
            result.unwrap();
        }

        // each rename moves the default domain: changed, added, verified, primary set, removed
        let org = commands
            .eventstore()
            .filter_to_query_reducer(&ctx(), OrgWriteModel::new(INSTANCE, &acme.id))
            .await
            .unwrap();
        assert_eq!(org.base().processed_sequence, 4 + 4 * 5);
        assert_eq!(org.verified_domains().len(), 1);
    }

    #[tokio::test]
    async fn multi_aggregate_batch_is_all_or_nothing() {
        let store = Arc::new(InMemoryEventStore::new());
        let es = Eventstore::new(store.clone(), IamCodec);
        es.push(&ctx(), vec![org_added("taken", "Taken")]).await.unwrap();

        // second aggregate collides on its name
        let err = es
            .push(&ctx(), vec![org_added("a", "Fresh"), org_added("b", "TAKEN")])
            .await
            .unwrap_err();
        assert!(err.is_already_exists());

        // second aggregate is stale
        let stale = org_added("b", "Other").expect(ExpectedVersion::Exact(7));
        let err = es
            .push(&ctx(), vec![org_added("a", "Fresh"), stale])
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        assert_eq!(store.len(), 1);
        let a = es
            .filter_to_query_reducer(&ctx(), OrgWriteModel::new(INSTANCE, "a"))
            .await
            .unwrap();
        assert!(!a.base().has_events());

        // the name "Fresh" was never claimed
        es.push(&ctx(), vec![org_added("c", "Fresh")]).await.unwrap();
    }

    #[tokio::test]
    async fn command_cancelled_mid_push_commits_nothing() {
        let store = Arc::new(SlowStore {
            inner: InMemoryEventStore::new(),
            delay: Duration::from_millis(200),
        });
        let commands = commands_on(store.clone(), RetryPolicy::none()).await;

        let token = CancellationToken::new();
        let ctx = ctx().with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = commands.add_org(&ctx, "Acme", Vec::new()).await.unwrap_err();
        canceller.await.unwrap();
        assert!(err.is_cancelled());
        // only the seeded instance
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn command_past_its_deadline_commits_nothing() {
        let store = Arc::new(SlowStore {
            inner: InMemoryEventStore::new(),
            delay: Duration::from_millis(200),
        });
        let commands = commands_on(store.clone(), RetryPolicy::none()).await;

        let ctx = ctx().with_timeout(Duration::from_millis(20));
        let err = commands.add_org(&ctx, "Acme", Vec::new()).await.unwrap_err();
        assert_eq!(err.message(), "Errors.Context.DeadlineExceeded");
        // only the seeded instance
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn org_with_admin_scenario() {
        let commands = commands_on(Arc::new(InMemoryEventStore::new()), RetryPolicy::default()).await;
        let home = commands.add_org(&ctx(), "Home", Vec::new()).await.unwrap();
        let grace = commands.add_human_user(&ctx(), &home.id, user("grace")).await.unwrap();

        let acme = commands
            .add_org(
                &ctx(),
                "Acme",
                vec![OrgAdmin {
                    user_id: grace.id.clone(),
                    roles: vec!["ORG_USER_MANAGER".into()],
                }],
            )
            .await
            .unwrap();
        assert_eq!(acme.details.resource_owner, acme.id);
        // org added + 3 domain events + member added
        assert_eq!(acme.details.sequence, 5);

        let member = commands
            .eventstore()
            .filter_to_query_reducer(&ctx(), OrgMemberWriteModel::new(INSTANCE, &acme.id, &grace.id))
            .await
            .unwrap();
        assert_eq!(member.roles, ["ORG_USER_MANAGER"]);

        // removing the org takes the membership with it
        commands.remove_org(&ctx(), &acme.id).await.unwrap();
        let member = commands
            .eventstore()
            .filter_to_query_reducer(&ctx(), OrgMemberWriteModel::new(INSTANCE, &acme.id, &grace.id))
            .await
            .unwrap();
        assert!(member.state.is_removed());
    }

    #[tokio::test]
    async fn tenants_do_not_see_each_other() {
        let commands = commands_on(Arc::new(InMemoryEventStore::new()), RetryPolicy::default()).await;
        let other = Ctx::new("inst-2", "other.example", Authz::system());
        seed_instance(&commands, &other).await;

        commands.add_org(&ctx(), "Acme", Vec::new()).await.unwrap();
        // org names are unique per instance only
        let created = commands.add_org(&other, "Acme", Vec::new()).await.unwrap();

        let model = commands
            .eventstore()
            .filter_to_query_reducer(&ctx(), OrgWriteModel::new(INSTANCE, &created.id))
            .await
            .unwrap();
        assert!(!model.base().has_events());
    }

    #[tokio::test]
    async fn user_managers_may_add_users_but_not_touch_the_org() {
        let commands = commands_on(Arc::new(InMemoryEventStore::new()), RetryPolicy::default()).await;
        let org = commands.add_org(&ctx(), "Acme", Vec::new()).await.unwrap();

        let manager = Principal::new(PrincipalId::new("manager-1")).with_membership(Membership {
            scope: Scope::org(INSTANCE, &org.id),
            roles: vec![Role::ORG_USER_MANAGER],
        });
        let as_manager = Ctx::new(
            INSTANCE,
            "iam.example",
            Authz::new(Arc::new(PolicyChecker::default()), manager),
        );

        let err = commands.deactivate_org(&as_manager, &org.id).await.unwrap_err();
        assert!(err.is_permission_denied());

        let created = commands
            .add_human_user(&as_manager, &org.id, user("grace"))
            .await
            .unwrap();

        let query = SearchQuery::builder()
            .instance_id(INSTANCE)
            .add_query()
            .aggregate_types(["user"])
            .aggregate_ids([created.id.as_str()])
            .build();
        let events = commands.eventstore().filter(&ctx(), &query).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].creator(), "manager-1");

        // a membership on another org grants nothing here
        let other = commands.add_org(&ctx(), "Globex", Vec::new()).await.unwrap();
        let err = commands
            .add_human_user(&as_manager, &other.id, user("linus"))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    #[ignore = "needs a PostgreSQL database in DATABASE_URL"]
    async fn postgres_store_runs_the_scenarios() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let store = crate::event_store::PostgresEventStore::connect(&url, 5).await.unwrap();
        let commands = commands_on(Arc::new(store), RetryPolicy::default()).await;

        // fresh instance per run keeps the test rerunnable
        let instance = format!("it-{}", unique_suffix());
        let ctx = Ctx::new(&instance, "pg.example", Authz::system());
        seed_instance(&commands, &ctx).await;

        let org = commands.add_org(&ctx, "Acme", Vec::new()).await.unwrap();
        let err = commands.add_org(&ctx, "ACME", Vec::new()).await.unwrap_err();
        assert!(err.is_already_exists());

        let user = commands.add_human_user(&ctx, &org.id, user("grace")).await.unwrap();
        commands
            .add_org_member(&ctx, &org.id, &user.id, vec!["ORG_OWNER".into()])
            .await
            .unwrap();
        commands.remove_org_member(&ctx, &org.id, &user.id).await.unwrap();
        commands
            .add_org_member(&ctx, &org.id, &user.id, vec!["ORG_USER_MANAGER".into()])
            .await
            .unwrap();

        let member = commands
            .eventstore()
            .filter_to_query_reducer(&ctx, OrgMemberWriteModel::new(&instance, &org.id, &user.id))
            .await
            .unwrap();
        assert_eq!(member.roles, ["ORG_USER_MANAGER"]);
    }

    fn unique_suffix() -> String {
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string()
    }
}
