use memrepo::model::{Member, Team, demo_source, member_repository, team_repository};
use memrepo::{DataSource, Example, ExampleMatcher, RepoError, Repository, RepositoryConfig, StringMatcher};

/// member1 (20) and member2 (30) in teamA, member3 (40) in teamB
async fn seeded() -> (DataSource, Repository<Member>, Team) {
    let source = demo_source(RepositoryConfig::default()).await.unwrap();
    let members = member_repository(&source).unwrap();
    let teams = team_repository(&source).unwrap();

    let mut uow = source.begin().await.unwrap();
    let mut team_a = Team::new("teamA");
    let mut team_b = Team::new("teamB");
    teams.save(&mut uow, &mut team_a).await.unwrap();
    teams.save(&mut uow, &mut team_b).await.unwrap();
    members
        .save(&mut uow, &mut Member::new("member1", 20).with_team(&team_a))
        .await
        .unwrap();
    members
        .save(&mut uow, &mut Member::new("member2", 30).with_team(&team_a))
        .await
        .unwrap();
    members
        .save(&mut uow, &mut Member::new("member3", 40).with_team(&team_b))
        .await
        .unwrap();
    uow.commit().await.unwrap();
    (source, members, team_a)
}

fn usernames(found: &[Member]) -> Vec<&str> {
    found.iter().map(|m| m.username.as_str()).collect()
}

#[tokio::test]
async fn test_probe_with_unsaved_team_ignoring_age() {
    let (source, members, _) = seeded().await;
    let mut uow = source.begin().await.unwrap();

    let probe = Member::new("member1", 99).with_team(&Team::new("teamA"));
    let example = Example::of_matching(probe, ExampleMatcher::matching().with_ignore_paths(&["age"]));
    let found = members.find_all_by_example(&mut uow, &example).await.unwrap();
    assert_eq!(usernames(&found), vec!["member1"]);

    let other_team = Member::new("member1", 0).with_team(&Team::new("teamB"));
    let found = members
        .find_all_by_example(&mut uow, &Example::of(other_team))
        .await
        .unwrap();
    assert!(found.is_empty());
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_probe_with_saved_team_matches_by_id() {
    let (source, members, team_a) = seeded().await;
    let mut uow = source.begin().await.unwrap();

    let mut probe = Member::default();
    probe.change_team(&team_a);
    let example = Example::of(probe);
    assert_eq!(members.count_by_example(&mut uow, &example).await.unwrap(), 2);
    assert!(members.exists_by_example(&mut uow, &example).await.unwrap());
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_empty_probe_matches_everything() {
    let (source, members, _) = seeded().await;
    let mut uow = source.begin().await.unwrap();

    let found = members
        .find_all_by_example(&mut uow, &Example::of(Member::default()))
        .await
        .unwrap();
    assert_eq!(found.len(), 3);
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_matching_any() {
    let (source, members, _) = seeded().await;
    let mut uow = source.begin().await.unwrap();

    let probe = Member::new("member1", 40);
    let all = Example::of(probe.clone());
    assert_eq!(members.count_by_example(&mut uow, &all).await.unwrap(), 0);

    let any = Example::of_matching(probe, ExampleMatcher::matching_any());
    let found = members.find_all_by_example(&mut uow, &any).await.unwrap();
    assert_eq!(usernames(&found), vec!["member1", "member3"]);
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_string_matchers_and_ignore_case() {
    let (source, members, _) = seeded().await;
    let mut uow = source.begin().await.unwrap();

    let starts = Example::of_matching(
        Member::new("MEMBER", 0),
        ExampleMatcher::matching()
            .with_string_matcher(StringMatcher::StartsWith)
            .with_ignore_case(&["username"]),
    );
    assert_eq!(members.count_by_example(&mut uow, &starts).await.unwrap(), 3);

    let case_sensitive = Example::of_matching(
        Member::new("MEMBER", 0),
        ExampleMatcher::matching().with_string_matcher(StringMatcher::StartsWith),
    );
    assert!(!members.exists_by_example(&mut uow, &case_sensitive).await.unwrap());

    let ends = Example::of_matching(
        Member::new("2", 0),
        ExampleMatcher::matching().with_string_matcher(StringMatcher::EndsWith),
    );
    let found = members.find_all_by_example(&mut uow, &ends).await.unwrap();
    assert_eq!(usernames(&found), vec!["member2"]);
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_find_one_by_example() {
    let (source, members, _) = seeded().await;
    let mut uow = source.begin().await.unwrap();

    let one = members
        .find_one_by_example(&mut uow, &Example::of(Member::new("member3", 0)))
        .await
        .unwrap();
    assert_eq!(one.map(|m| m.age), Some(40));

    let none = members
        .find_one_by_example(&mut uow, &Example::of(Member::new("nobody", 0)))
        .await
        .unwrap();
    assert!(none.is_none());

    let several = Example::of_matching(
        Member::new("member", 0),
        ExampleMatcher::matching().with_string_matcher(StringMatcher::Contains),
    );
    assert!(matches!(
        members.find_one_by_example(&mut uow, &several).await,
        Err(RepoError::AmbiguousResult { found: 3, .. })
    ));
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn test_unknown_ignore_path() {
    let (source, members, _) = seeded().await;
    let mut uow = source.begin().await.unwrap();

    let example = Example::of_matching(
        Member::new("member1", 0),
        ExampleMatcher::matching().with_ignore_paths(&["nickname"]),
    );
    assert!(matches!(
        members.find_all_by_example(&mut uow, &example).await,
        Err(RepoError::UnknownField { .. })
    ));
    uow.rollback().await.unwrap();
}
