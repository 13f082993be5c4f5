use crate::core::{Column, DataType, EntitySchema, Result, Row, Value};
use crate::entity::{Entity, column};
use lazy_static::lazy_static;

lazy_static! {
    static ref TEAM_SCHEMA: EntitySchema = EntitySchema::new(
        "Team",
        "team",
        "id",
        vec![
            Column::new("id", DataType::Integer),
            Column::new("name", DataType::Text).not_null(),
        ],
    );
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Team {
    pub id: Option<i64>,
    pub name: String,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

impl Entity for Team {
    fn schema() -> &'static EntitySchema {
        &TEAM_SCHEMA
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
            Value::from(self.name.as_str()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        let schema = Self::schema();
        Ok(Self {
            id: column(schema, row, "id")?,
            name: column(schema, row, "name")?,
        })
    }
}
