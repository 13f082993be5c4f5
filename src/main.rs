use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memrepo::model::{
    Member, MemberDto, MemberProjection, NestedClosedProjection, Team, demo_source, member_repository,
    team_repository,
};
use memrepo::{
    DataSource, Direction, Example, ExampleMatcher, FromProjection, PageRequest, Repository, RepositoryConfig, Sort, UnitOfWork,
    named_params, params,
};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "memrepo")]
#[command(about = "Run repository scenarios against a fresh in-memory store and print JSON")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Six members aged 10, paged by username descending
    Paging {
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = 3)]
        size: usize,
    },
    /// Increment the age of every member at or above the threshold
    BulkUpdate {
        #[arg(long, default_value_t = 20)]
        threshold: i64,
    },
    /// Nested and aliased projections of members with teams
    Projections,
    /// Query by example, ignoring age
    Example {
        #[arg(long, default_value = "member1")]
        username: String,
        #[arg(long, default_value = "teamA")]
        team: String,
    },
    /// List the member repository's query methods
    Queries,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let source = demo_source(RepositoryConfig::default())
        .await
        .context("registering demo entities")?;
    let members = member_repository(&source).context("resolving member queries")?;

    match cli.command {
        Command::Paging { page, size } => paging(&source, &members, page, size).await,
        Command::BulkUpdate { threshold } => bulk_update(&source, &members, threshold).await,
        Command::Projections => projections(&source, &members).await,
        Command::Example { username, team } => example(&source, &members, &username, &team).await,
        Command::Queries => print(&members.queries().names()),
    }
}

async fn paging(source: &DataSource, members: &Repository<Member>, page: usize, size: usize) -> Result<()> {
    let mut uow = source.begin().await?;
    for n in 1..=6 {
        members
            .save(&mut uow, &mut Member::new(format!("member{}", n), 10))
            .await?;
    }

    let request = PageRequest::of_sorted(page, size, Sort::by(Direction::Desc, &["username"]))?;
    let result = members
        .find_page(&mut uow, "findByAge", params![10], &request)
        .await?
        .map(|member| MemberDto::from(&member));
    uow.commit().await?;
    print(&result)
}

#[derive(Serialize)]
struct BulkReport {
    affected: u64,
    ages: Vec<i64>,
}

async fn bulk_update(source: &DataSource, members: &Repository<Member>, threshold: i64) -> Result<()> {
    let mut uow = source.begin().await?;
    for (n, age) in [10, 19, 20, 21, 40].into_iter().enumerate() {
        members
            .save(&mut uow, &mut Member::new(format!("member{}", n + 1), age))
            .await?;
    }

    let affected = members
        .execute_update(&mut uow, "bulkAgePlus", named_params! { "age" => threshold })
        .await?;
    uow.clear();

    let ages = members
        .find_all_sorted(&mut uow, &Sort::by(Direction::Asc, &["username"]))
        .await?
        .into_iter()
        .map(|member| member.age)
        .collect();
    uow.commit().await?;
    print(&BulkReport { affected, ages })
}

#[derive(Serialize)]
struct ProjectionReport {
    nested: Vec<NestedClosedProjection>,
    native: memrepo::Page<MemberProjection>,
    dto: Vec<MemberDto>,
}

async fn projections(source: &DataSource, members: &Repository<Member>) -> Result<()> {
    let mut uow = source.begin().await?;
    let team_a = seed_teams(source, &mut uow, members).await?;

    let nested = members
        .find_projections::<NestedClosedProjection>(&mut uow, "findProjectionsByUsername", params!["member1"])
        .await?;
    let native = members
        .find_projected_page(&mut uow, "findByNativeProjection", params![], &PageRequest::of(0, 10)?)
        .await?;
    let native = native.map(|row| MemberProjection::from_projection(&row));
    let native = transpose_page(native)?;
    let dto = members
        .find_projections::<MemberDto>(&mut uow, "findListByUsername", params!["member2"])
        .await?;
    uow.commit().await?;

    log::debug!("projected members of team {:?}", team_a.id);
    print(&ProjectionReport { nested, native, dto })
}

async fn example(source: &DataSource, members: &Repository<Member>, username: &str, team: &str) -> Result<()> {
    let mut uow = source.begin().await?;
    seed_teams(source, &mut uow, members).await?;
    uow.flush().await?;
    uow.clear();

    let probe = Member::new(username, 0).with_team(&Team::new(team));
    let example = Example::of_matching(probe, ExampleMatcher::matching().with_ignore_paths(&["age"]));
    let found: Vec<MemberDto> = members
        .find_all_by_example(&mut uow, &example)
        .await?
        .iter()
        .map(MemberDto::from)
        .collect();
    uow.commit().await?;
    print(&found)
}

/// member1 and member2 in teamA, member3 in teamB
async fn seed_teams(source: &DataSource, uow: &mut UnitOfWork, members: &Repository<Member>) -> Result<Team> {
    let teams = team_repository(source)?;
    let mut team_a = Team::new("teamA");
    let mut team_b = Team::new("teamB");
    teams.save(uow, &mut team_a).await?;
    teams.save(uow, &mut team_b).await?;

    members
        .save(uow, &mut Member::new("member1", 0).with_team(&team_a))
        .await?;
    members
        .save(uow, &mut Member::new("member2", 0).with_team(&team_a))
        .await?;
    members
        .save(uow, &mut Member::new("member3", 0).with_team(&team_b))
        .await?;
    Ok(team_a)
}

fn transpose_page<T>(page: memrepo::Page<memrepo::Result<T>>) -> Result<memrepo::Page<T>> {
    let request = PageRequest::of(page.number(), page.size())?;
    let total = page.total_elements();
    let content = page.into_content().into_iter().collect::<memrepo::Result<Vec<T>>>()?;
    Ok(memrepo::Page::new(content, &request, total))
}

fn print<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
