//! Views of `Member` returned instead of the entity.

use super::Member;
use crate::core::Result;
use crate::executor::{FromProjection, Projected};
use crate::query::{FieldPath, Projection, Selection};
use serde::Serialize;

/// Member with its team's name flattened in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberDto {
    pub id: Option<i64>,
    pub username: String,
    pub team_name: Option<String>,
}

impl MemberDto {
    pub fn new(id: Option<i64>, username: impl Into<String>, team_name: Option<String>) -> Self {
        Self {
            id,
            username: username.into(),
            team_name,
        }
    }
}

/// Team name is only known when the team was fetched.
impl From<&Member> for MemberDto {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id,
            username: member.username.clone(),
            team_name: member.loaded_team().map(|team| team.name.clone()),
        }
    }
}

impl FromProjection for MemberDto {
    fn shape() -> Projection {
        Projection::Fields(vec![
            Selection::path("id"),
            Selection::path("username"),
            Selection::new(FieldPath::nested("team", "name"), "team_name"),
        ])
    }

    fn from_projection(projected: &Projected) -> Result<Self> {
        Ok(Self {
            id: projected.value("id")?,
            username: projected.value("username")?,
            team_name: projected.value("team_name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsernameOnly {
    pub username: String,
}

impl FromProjection for UsernameOnly {
    fn shape() -> Projection {
        Projection::fields(&["username"])
    }

    fn from_projection(projected: &Projected) -> Result<Self> {
        Ok(Self {
            username: projected.value("username")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamInfo {
    pub name: String,
}

/// Username plus a nested view of the team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NestedClosedProjection {
    pub username: String,
    pub team: Option<TeamInfo>,
}

impl FromProjection for NestedClosedProjection {
    fn shape() -> Projection {
        Projection::nested(&["username"], &[("team", &["name"])])
    }

    fn from_projection(projected: &Projected) -> Result<Self> {
        let team = match projected.nested("team") {
            Some(team) => Some(TeamInfo {
                name: team.value("name")?,
            }),
            None => None,
        };
        Ok(Self {
            username: projected.value("username")?,
            team,
        })
    }
}

/// Flat row of an aliased explicit query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberProjection {
    pub id: i64,
    pub username: String,
    pub team_name: Option<String>,
}

impl FromProjection for MemberProjection {
    fn shape() -> Projection {
        Projection::Fields(vec![
            Selection::path("id"),
            Selection::path("username"),
            Selection::new(FieldPath::nested("team", "name"), "team_name"),
        ])
    }

    fn from_projection(projected: &Projected) -> Result<Self> {
        Ok(Self {
            id: projected.value("id")?,
            username: projected.value("username")?,
            team_name: projected.value("team_name")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::model::Team;

    #[test]
    fn test_dto_from_member() {
        let mut member = Member::new("member1", 10);
        member.id = Some(1);
        assert_eq!(MemberDto::from(&member), MemberDto::new(Some(1), "member1", None));

        member.team = Some(crate::entity::Related::loaded(Team {
            id: Some(2),
            name: "teamA".into(),
        }));
        assert_eq!(MemberDto::from(&member).team_name.as_deref(), Some("teamA"));
    }

    #[test]
    fn test_nested_projection_without_team() {
        let projected = Projected::new()
            .with_value("username", Value::from("member1"))
            .with_nested("team", None);
        let view = NestedClosedProjection::from_projection(&projected).unwrap();
        assert_eq!(view.username, "member1");
        assert!(view.team.is_none());
    }

    #[test]
    fn test_member_projection_reads_nullable_team() {
        let projected = Projected::new()
            .with_value("id", Value::Integer(1))
            .with_value("username", Value::from("member1"))
            .with_value("team_name", Value::Null);
        let view = MemberProjection::from_projection(&projected).unwrap();
        assert_eq!(view.team_name, None);
        assert_eq!(view.id, 1);
    }
}
