//! Demo domain: members that belong to teams.

pub mod dto;
pub mod member;
pub mod member_repository;
pub mod team;

pub use dto::{MemberDto, MemberProjection, NestedClosedProjection, TeamInfo, UsernameOnly};
pub use member::Member;
pub use member_repository::{demo_source, member_queries, member_repository, team_repository};
pub use team::Team;
