use memrepo::model::{Member, Team, demo_source, member_repository, team_repository};
use memrepo::{
    DataSource, Direction, QueryMethod, QueryOutcome, RepoError, Repository, RepositoryConfig, Sort,
    named_params, params,
};

async fn setup() -> (DataSource, Repository<Member>, Repository<Team>) {
    let source = demo_source(RepositoryConfig::default()).await.unwrap();
    let members = member_repository(&source).unwrap();
    let teams = team_repository(&source).unwrap();
    (source, members, teams)
}

#[tokio::test]
async fn test_save_then_find_by_id() {
    let (source, members, _) = setup().await;

    let mut uow = source.begin().await.unwrap();
    let mut member = Member::new("memberA", 0);
    let id = members.save(&mut uow, &mut member).await.unwrap();
    assert_eq!(member.id, Some(id));

    let found = members.find_by_id(&mut uow, id).await.unwrap().unwrap();
    assert_eq!(found, member);
    uow.commit().await.unwrap();

    let mut uow = source.begin().await.unwrap();
    let found = members.find_by_id(&mut uow, id).await.unwrap().unwrap();
    assert_eq!(found, member);
    assert!(members.find_by_id(&mut uow, id + 100).await.unwrap().is_none());
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_basic_crud() {
    let (source, members, _) = setup().await;
    let mut uow = source.begin().await.unwrap();

    let mut member1 = Member::new("member1", 10);
    let mut member2 = Member::new("member2", 20);
    members.save(&mut uow, &mut member1).await.unwrap();
    members.save(&mut uow, &mut member2).await.unwrap();

    let all = members.find_all(&mut uow).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(members.count(&mut uow).await.unwrap(), 2);
    assert!(members.exists_by_id(&mut uow, member1.id.unwrap()).await.unwrap());

    // staged change of a managed entity is flushed before the next query
    member1.age = 11;
    members.save(&mut uow, &mut member1).await.unwrap();
    let older = members
        .find_list(&mut uow, "findByUsernameAndAgeGreaterThan", params!["member1", 10])
        .await
        .unwrap();
    assert_eq!(older, vec![member1.clone()]);

    assert!(members.delete(&mut uow, &member1).await.unwrap());
    assert!(!members.delete_by_id(&mut uow, member1.id.unwrap()).await.unwrap());
    assert_eq!(members.count(&mut uow).await.unwrap(), 1);

    assert_eq!(members.delete_all(&mut uow).await.unwrap(), 1);
    assert_eq!(members.count(&mut uow).await.unwrap(), 0);
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_save_rejects_unsaved_team() {
    let (source, members, _) = setup().await;
    let mut uow = source.begin().await.unwrap();

    let mut member = Member::new("member1", 10).with_team(&Team::new("teamA"));
    let err = members.save(&mut uow, &mut member).await.unwrap_err();
    assert!(matches!(err, RepoError::ConstraintViolation(_)));
    assert!(member.id.is_none());
    uow.rollback().await.unwrap();
}

#[tokio::test]
async fn test_derived_and_explicit_queries() {
    let (source, members, _) = setup().await;
    let mut uow = source.begin().await.unwrap();
    members.save(&mut uow, &mut Member::new("aaa", 10)).await.unwrap();
    members.save(&mut uow, &mut Member::new("aaa", 20)).await.unwrap();
    members.save(&mut uow, &mut Member::new("bbb", 20)).await.unwrap();

    let derived = members
        .find_list(&mut uow, "findByUsernameAndAgeGreaterThan", params!["aaa", 19])
        .await
        .unwrap();
    assert_eq!(derived.len(), 1);
    assert_eq!(derived[0].username, "aaa");
    assert_eq!(derived[0].age, 20);

    let explicit = members
        .find_list(&mut uow, "findUser", named_params! { "username" => "aaa", "age" => 20 })
        .await
        .unwrap();
    assert_eq!(explicit, derived);

    // named query registered as Member.findByUsername
    let named = members
        .find_list(&mut uow, "findByUsername", params!["bbb"])
        .await
        .unwrap();
    assert_eq!(named.len(), 1);

    let in_list = members
        .find_list(&mut uow, "findByNames", params![vec!["aaa", "bbb"]])
        .await
        .unwrap();
    assert_eq!(in_list.len(), 3);

    let names = members
        .find_projected(&mut uow, "findUsernameList", params![])
        .await
        .unwrap();
    let names: Vec<String> = names.iter().map(|row| row.value("username").unwrap()).collect();
    assert_eq!(names, vec!["aaa", "aaa", "bbb"]);

    let distinct = members
        .find_projected(&mut uow, "findDistinctUsernameByAgeGreaterThan", params![0])
        .await
        .unwrap();
    assert_eq!(distinct.len(), 2);

    assert_eq!(members.count_by(&mut uow, "countByAge", params![20]).await.unwrap(), 2);
    assert!(members.exists_by(&mut uow, "existsByUsername", params!["bbb"]).await.unwrap());
    assert!(!members.exists_by(&mut uow, "existsByUsername", params!["ccc"]).await.unwrap());
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_return_types() {
    let (source, members, _) = setup().await;
    let mut uow = source.begin().await.unwrap();
    members.save(&mut uow, &mut Member::new("aaa", 10)).await.unwrap();
    members.save(&mut uow, &mut Member::new("bbb", 20)).await.unwrap();
    members.save(&mut uow, &mut Member::new("bbb", 30)).await.unwrap();

    let one = members
        .find_one(&mut uow, "findMemberByUsername", params!["aaa"])
        .await
        .unwrap();
    assert_eq!(one.age, 10);

    let optional = members
        .find_optional(&mut uow, "findOptionalByUsername", params!["aaa"])
        .await
        .unwrap();
    assert_eq!(optional.map(|m| m.age), Some(10));

    let none = members
        .find_optional(&mut uow, "findOptionalByUsername", params!["zzz"])
        .await
        .unwrap();
    assert!(none.is_none());

    let list = members
        .find_list(&mut uow, "findListByUsername", params!["zzz"])
        .await
        .unwrap();
    assert!(list.is_empty());

    let missing = members
        .find_one(&mut uow, "findMemberByUsername", params!["zzz"])
        .await
        .unwrap_err();
    assert!(matches!(missing, RepoError::NotFound(_)));

    let ambiguous = members
        .find_one(&mut uow, "findMemberByUsername", params!["bbb"])
        .await
        .unwrap_err();
    assert!(matches!(ambiguous, RepoError::AmbiguousResult { found: 2, .. }));

    let ambiguous = members
        .find_optional(&mut uow, "findOptionalByUsername", params!["bbb"])
        .await
        .unwrap_err();
    assert!(matches!(ambiguous, RepoError::AmbiguousResult { found: 2, .. }));

    // typed helpers check the declared result kind
    let wrong = members
        .find_list(&mut uow, "findMemberByUsername", params!["aaa"])
        .await
        .unwrap_err();
    assert!(matches!(wrong, RepoError::Query(_)));

    match members
        .invoke(&mut uow, "findListByUsername", params!["bbb"], None)
        .await
        .unwrap()
    {
        QueryOutcome::List(found) => assert_eq!(found.len(), 2),
        other => panic!("unexpected outcome: {other:?}"),
    }
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_parameter_binding_errors() {
    let (source, members, _) = setup().await;
    let mut uow = source.begin().await.unwrap();

    let err = members
        .find_list(&mut uow, "findByUsernameAndAgeGreaterThan", params!["aaa"])
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::ParameterBinding(_)));

    let err = members
        .find_list(&mut uow, "findUser", named_params! { "username" => "aaa", "years" => 3 })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::ParameterBinding(_)));

    let err = members
        .find_list(&mut uow, "findByNames", params!["aaa"])
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::ParameterBinding(_)));

    let err = members
        .find_list(&mut uow, "findNothing", params![])
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Query(_)));
    uow.rollback().await.unwrap();
}

#[tokio::test]
async fn test_registration_is_validated() {
    let (source, _, _) = setup().await;
    let repository = Repository::<Member>::new(&source).unwrap();

    let err = repository
        .with_query(QueryMethod::derived("findByNickname"))
        .err()
        .unwrap();
    assert!(matches!(err, RepoError::UnknownField { .. }));

    let mut repository = Repository::<Member>::new(&source).unwrap();
    let err = repository
        .register(QueryMethod::derived("findByUsernameOrderByNicknameDesc"))
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownField { .. }));

    let err = repository
        .register(QueryMethod::query("findUser", "SELECT m FROM Member m WHERE m.age = :age").params(&["age", "x"]))
        .unwrap_err();
    assert!(matches!(err, RepoError::ParameterBinding(_)));

    let err = repository
        .register(QueryMethod::derived("findByUsername").returns(memrepo::ResultKind::Modifying))
        .unwrap_err();
    assert!(matches!(err, RepoError::Query(_)));
}

#[tokio::test]
async fn test_sorted_and_limited_queries() {
    let (source, members, _) = setup().await;
    let mut uow = source.begin().await.unwrap();
    for (name, age) in [("c", 30), ("a", 10), ("b", 20), ("d", 20)] {
        members.save(&mut uow, &mut Member::new(name, age)).await.unwrap();
    }

    let sorted = members
        .find_all_sorted(&mut uow, &Sort::by(Direction::Desc, &["age"]).and(Sort::by(Direction::Asc, &["username"])))
        .await
        .unwrap();
    let names: Vec<&str> = sorted.iter().map(|m| m.username.as_str()).collect();
    assert_eq!(names, vec!["c", "b", "d", "a"]);

    let mut repository = Repository::<Member>::new(&source).unwrap();
    repository
        .register(QueryMethod::derived("findTop2ByAgeGreaterThanOrderByAgeDescUsernameAsc"))
        .unwrap();
    let top = repository
        .find_list(&mut uow, "findTop2ByAgeGreaterThanOrderByAgeDescUsernameAsc", params![10])
        .await
        .unwrap();
    let names: Vec<&str> = top.iter().map(|m| m.username.as_str()).collect();
    assert_eq!(names, vec!["c", "b"]);

    let err = members
        .find_all_sorted(&mut uow, &Sort::by(Direction::Asc, &["nickname"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownField { .. }));
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_relations_load_explicitly_or_by_fetch_graph() {
    let (source, members, teams) = setup().await;
    let mut uow = source.begin().await.unwrap();
    let mut team_a = Team::new("teamA");
    let mut team_b = Team::new("teamB");
    teams.save(&mut uow, &mut team_a).await.unwrap();
    teams.save(&mut uow, &mut team_b).await.unwrap();
    members
        .save(&mut uow, &mut Member::new("member1", 10).with_team(&team_a))
        .await
        .unwrap();
    members
        .save(&mut uow, &mut Member::new("member2", 10).with_team(&team_b))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let mut uow = source.begin().await.unwrap();
    let mut lazy = members
        .find_list(&mut uow, "findListByUsername", params!["member1"])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(lazy.team_id(), team_a.id);
    assert!(lazy.loaded_team().is_none());
    assert!(members.load_related(&mut uow, &mut lazy, "team").await.unwrap());
    assert_eq!(lazy.loaded_team(), Some(&team_a));

    let eager = members
        .find_list(&mut uow, "findEntityGraphByUsername", params!["member2"])
        .await
        .unwrap();
    assert_eq!(eager[0].loaded_team().map(|t| t.name.as_str()), Some("teamB"));

    let mut no_team = Member::new("member3", 10);
    members.save(&mut uow, &mut no_team).await.unwrap();
    assert!(!members.load_related(&mut uow, &mut no_team, "team").await.unwrap());
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_custom_finder() {
    let (source, members, _) = setup().await;
    let mut uow = source.begin().await.unwrap();
    members.save(&mut uow, &mut Member::new("member1", 10)).await.unwrap();
    members.save(&mut uow, &mut Member::new("member2", 30)).await.unwrap();

    let adults = members.find_with(&mut uow, |m| m.age >= 18).await.unwrap();
    assert_eq!(adults.len(), 1);
    assert_eq!(adults[0].username, "member2");
    uow.commit().await.unwrap();
}
