use super::Team;
use crate::core::{Column, DataType, EntitySchema, RepoError, Result, Row, Value};
use crate::entity::{Entity, Related, column};
use lazy_static::lazy_static;

lazy_static! {
    static ref MEMBER_SCHEMA: EntitySchema = EntitySchema::new(
        "Member",
        "member",
        "id",
        vec![
            Column::new("id", DataType::Integer),
            Column::new("username", DataType::Text).not_null(),
            Column::new("age", DataType::Integer).not_null(),
            Column::reference("team", "team"),
        ],
    );
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Member {
    pub id: Option<i64>,
    pub username: String,
    pub age: i64,
    /// Lazy: holds the team id until loaded
    pub team: Option<Related<Team>>,
}

impl Member {
    pub fn new(username: impl Into<String>, age: i64) -> Self {
        Self {
            username: username.into(),
            age,
            ..Self::default()
        }
    }

    pub fn with_team(mut self, team: &Team) -> Self {
        self.change_team(team);
        self
    }

    /// Point at `team`. A saved team is referenced by id; an unsaved one is
    /// kept whole and rejected by `save`, but still usable as a probe.
    pub fn change_team(&mut self, team: &Team) {
        self.team = Some(match team.id {
            Some(id) => Related::Id(id),
            None => Related::loaded(team.clone()),
        });
    }

    pub fn team_id(&self) -> Option<i64> {
        self.team.as_ref().and_then(Related::id)
    }

    /// The team if it has been fetched
    pub fn loaded_team(&self) -> Option<&Team> {
        self.team.as_ref().and_then(Related::get)
    }
}

impl Entity for Member {
    fn schema() -> &'static EntitySchema {
        &MEMBER_SCHEMA
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_row(&self) -> Row {
        vec![
            self.id.map(Value::Integer).unwrap_or(Value::Null),
            Value::from(self.username.as_str()),
            Value::Integer(self.age),
            self.team_id().map(Value::Integer).unwrap_or(Value::Null),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        let schema = Self::schema();
        let team: Option<i64> = column(schema, row, "team")?;
        Ok(Self {
            id: column(schema, row, "id")?,
            username: column(schema, row, "username")?,
            age: column(schema, row, "age")?,
            team: team.map(Related::Id),
        })
    }

    fn attach_related(&mut self, field: &str, row: &Row) -> Result<()> {
        match field {
            "team" => {
                self.team = Some(Related::loaded(Team::from_row(row)?));
                Ok(())
            }
            other => Err(RepoError::unknown_field(Self::schema().entity(), other)),
        }
    }

    fn related_probes(&self) -> Vec<(&'static str, Option<i64>, Row)> {
        match &self.team {
            Some(Related::Loaded(team)) => vec![("team", team.id, team.to_row())],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_round_trip_keeps_team_reference() {
        let mut team = Team::new("teamA");
        team.set_id(7);
        let mut member = Member::new("member1", 10).with_team(&team);
        member.set_id(1);

        let row = member.to_row();
        assert_eq!(row[3], Value::Integer(7));

        let read = Member::from_row(&row).unwrap();
        assert_eq!(read, member);
        assert!(read.loaded_team().is_none());
    }

    #[test]
    fn test_attach_related() {
        let mut member = Member::new("member1", 10);
        member
            .attach_related("team", &vec![Value::Integer(3), Value::from("teamB")])
            .unwrap();
        assert_eq!(member.loaded_team().map(|t| t.name.as_str()), Some("teamB"));
        assert_eq!(member.team_id(), Some(3));
        assert!(member.attach_related("age", &vec![]).is_err());
    }

    #[test]
    fn test_unsaved_team_is_a_probe() {
        let member = Member::new("member1", 0).with_team(&Team::new("teamA"));
        let probes = member.related_probes();
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].0, "team");
        assert_eq!(probes[0].1, None);
        assert_eq!(member.to_row()[3], Value::Null);
    }
}
