//! The query table of the member repository.

use super::{Member, Team};
use crate::core::Result;
use crate::facade::DataSource;
use crate::query::{LockMode, Projection, QueryMethod, ResultKind};
use crate::repository::Repository;

/// Query text of the named query `Member.findByUsername`
pub const FIND_BY_USERNAME: &str = "SELECT m FROM Member m WHERE m.username = :username";

/// Every query method the member repository declares.
pub fn member_queries() -> Vec<QueryMethod> {
    vec![
        QueryMethod::derived("findByUsernameAndAgeGreaterThan"),
        QueryMethod::derived("findByUsername").params(&["username"]),
        QueryMethod::query(
            "findUser",
            "SELECT m FROM Member m WHERE m.username = :username AND m.age = :age",
        )
        .params(&["username", "age"]),
        QueryMethod::query("findUsernameList", "SELECT m.username FROM Member m"),
        QueryMethod::query(
            "findMemberDto",
            "SELECT m.id, m.username, m.team.name AS team_name FROM Member m",
        ),
        QueryMethod::query("findByNames", "SELECT m FROM Member m WHERE m.username IN (:names)")
            .params(&["names"]),
        QueryMethod::derived("findMemberByUsername").returns(ResultKind::One),
        QueryMethod::derived("findOptionalByUsername").returns(ResultKind::Optional),
        QueryMethod::derived("findListByUsername").returns(ResultKind::List),
        QueryMethod::derived("findByAge").returns(ResultKind::Page),
        QueryMethod::derived("findSliceByAge").returns(ResultKind::Slice),
        QueryMethod::derived("countByAge"),
        QueryMethod::derived("existsByUsername"),
        QueryMethod::query("bulkAgePlus", "UPDATE member m SET age = m.age + 1 WHERE m.age >= :age")
            .params(&["age"])
            .returns(ResultKind::Modifying),
        QueryMethod::derived("findEntityGraphByUsername").fetch(&["team"]),
        QueryMethod::derived("findReadOnlyByUsername")
            .returns(ResultKind::One)
            .read_only(),
        QueryMethod::derived("findLockByUsername").lock(LockMode::PessimisticWrite),
        QueryMethod::derived("findProjectionsByUsername"),
        QueryMethod::query(
            "findByNativeProjection",
            "SELECT m.id AS id, m.username AS username, m.team.name AS team_name FROM member m",
        )
        .count_query("SELECT COUNT(*) FROM member")
        .returns(ResultKind::Page),
        QueryMethod::derived("findDistinctUsernameByAgeGreaterThan")
            .project(Projection::fields(&["username"])),
    ]
}

/// Member repository with every method of `member_queries` registered.
pub fn member_repository(source: &DataSource) -> Result<Repository<Member>> {
    let mut repository =
        Repository::<Member>::new(source)?.with_named_query("findByUsername", FIND_BY_USERNAME);
    for method in member_queries() {
        repository.register(method)?;
    }
    Ok(repository)
}

pub fn team_repository(source: &DataSource) -> Result<Repository<Team>> {
    Repository::new(source)
}

/// A data source with `Team` and `Member` registered.
pub async fn demo_source(config: crate::RepositoryConfig) -> Result<DataSource> {
    let mut source = DataSource::new(config);
    source.register::<Team>().await?;
    source.register::<Member>().await?;
    Ok(source)
}
