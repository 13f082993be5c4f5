use memrepo::model::{Member, demo_source, member_repository};
use memrepo::{DataSource, Direction, QueryMethod, RepoError, Repository, RepositoryConfig, Sort, named_params, params};

const AGES: [i64; 5] = [10, 19, 20, 21, 40];

async fn seeded() -> (DataSource, Repository<Member>) {
    let source = demo_source(RepositoryConfig::default()).await.unwrap();
    let members = member_repository(&source).unwrap();
    let mut uow = source.begin().await.unwrap();
    for (n, age) in AGES.into_iter().enumerate() {
        members
            .save(&mut uow, &mut Member::new(format!("member{}", n + 1), age))
            .await
            .unwrap();
    }
    uow.commit().await.unwrap();
    (source, members)
}

async fn ages(members: &Repository<Member>, uow: &mut memrepo::UnitOfWork) -> Vec<i64> {
    members
        .find_all_sorted(uow, &Sort::by(Direction::Asc, &["username"]))
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.age)
        .collect()
}

#[tokio::test]
async fn test_bulk_age_plus() {
    let (source, members) = seeded().await;
    let mut uow = source.begin().await.unwrap();

    let affected = members
        .execute_update(&mut uow, "bulkAgePlus", named_params! { "age" => 20 })
        .await
        .unwrap();
    assert_eq!(affected, 3);

    uow.clear();
    assert_eq!(ages(&members, &mut uow).await, vec![10, 19, 21, 22, 41]);
    uow.commit().await.unwrap();

    let mut uow = source.begin().await.unwrap();
    assert_eq!(ages(&members, &mut uow).await, vec![10, 19, 21, 22, 41]);
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_each_matching_row_incremented_once() {
    let (source, members) = seeded().await;
    for threshold in [0, 15, 21, 41] {
        let mut uow = source.begin().await.unwrap();
        let before = ages(&members, &mut uow).await;
        let affected = members
            .execute_update(&mut uow, "bulkAgePlus", params![threshold])
            .await
            .unwrap();
        uow.clear();
        let after = ages(&members, &mut uow).await;

        let expected = before.iter().filter(|age| **age >= threshold).count() as u64;
        assert_eq!(affected, expected, "threshold {}", threshold);
        for (old, new) in before.iter().zip(after.iter()) {
            let bump = if *old >= threshold { 1 } else { 0 };
            assert_eq!(*new, old + bump);
        }
        uow.rollback().await.unwrap();
    }
}

#[tokio::test]
async fn test_managed_entities_stay_stale_until_cleared() {
    let (source, members) = seeded().await;
    let mut uow = source.begin().await.unwrap();

    let member5 = members
        .find_one(&mut uow, "findMemberByUsername", params!["member5"])
        .await
        .unwrap();
    assert_eq!(member5.age, 40);

    members
        .execute_update(&mut uow, "bulkAgePlus", params![20])
        .await
        .unwrap();

    let stale = members
        .find_list(&mut uow, "findByUsername", params!["member5"])
        .await
        .unwrap();
    assert_eq!(stale[0].age, 40);

    let id = member5.id.unwrap();
    assert!(uow.detach("member", id));
    let fresh = members.find_by_id(&mut uow, id).await.unwrap().unwrap();
    assert_eq!(fresh.age, 41);
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_bulk_delete() {
    let (source, mut members) = seeded().await;
    members
        .register(QueryMethod::derived("deleteByAgeLessThan"))
        .unwrap();

    let mut uow = source.begin().await.unwrap();
    let removed = members
        .execute_update(&mut uow, "deleteByAgeLessThan", params![20])
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(members.count(&mut uow).await.unwrap(), 3);
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_modifying_result_is_not_a_list() {
    let (source, members) = seeded().await;
    let mut uow = source.begin().await.unwrap();
    let err = members
        .find_list(&mut uow, "bulkAgePlus", params![20])
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Query(_)));
    uow.rollback().await.unwrap();
}
