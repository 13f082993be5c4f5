use crate::core::{EntitySchema, RepoError, Result, Row, Snapshot, Value};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct MvccRow {
    pub row: Row,
    pub xmin: u64,         // Transaction ID that created this version
    pub xmax: Option<u64>, // Transaction ID that deleted/replaced this version
}

/// Versioned rows of one entity table, keyed by entity identifier.
#[derive(Debug, Clone)]
pub struct Table {
    schema: EntitySchema,
    rows: BTreeMap<i64, Vec<MvccRow>>,
    next_id: i64,
    /// Row id -> owning transaction of a pessimistic write lock
    locks: HashMap<i64, u64>,
}

impl Table {
    pub fn new(schema: EntitySchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_id: 1,
            locks: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Insert a row. A NULL identifier is assigned from the table sequence;
    /// an explicit identifier must not belong to a live row.
    pub fn insert(&mut self, mut row: Row, snapshot: &Snapshot) -> Result<i64> {
        self.schema.validate_row(&row)?;
        let id_idx = self.schema.id_index();

        let id = match &row[id_idx] {
            Value::Null => self.next_id,
            value => value.as_i64().ok_or_else(|| {
                RepoError::TypeMismatch(format!("Identifier must be INTEGER, got {}", value.type_name()))
            })?,
        };

        self.check_lock(id, snapshot.tx_id)?;

        if let Some(versions) = self.rows.get(&id)
            && versions.iter().any(|v| self.is_version_live(v, snapshot))
        {
            return Err(RepoError::ConstraintViolation(format!(
                "Duplicate identifier {} in '{}'",
                id,
                self.schema.table()
            )));
        }

        row[id_idx] = Value::Integer(id);
        self.next_id = self.next_id.max(id + 1);

        self.rows.entry(id).or_default().push(MvccRow {
            row,
            xmin: snapshot.tx_id,
            xmax: None,
        });

        Ok(id)
    }

    pub fn update(&mut self, id: i64, new_row: Row, snapshot: &Snapshot) -> Result<bool> {
        self.schema.validate_row(&new_row)?;
        if self.schema.row_id(&new_row) != Some(id) {
            return Err(RepoError::ConstraintViolation(format!(
                "Identifier of '{}' row {} is immutable",
                self.schema.table(),
                id
            )));
        }
        self.check_lock(id, snapshot.tx_id)?;

        let Some(idx) = self.visible_index(id, snapshot) else {
            return Ok(false);
        };
        self.check_not_superseded(id, idx, snapshot)?;

        if let Some(versions) = self.rows.get_mut(&id) {
            versions[idx].xmax = Some(snapshot.tx_id);
            versions.push(MvccRow {
                row: new_row,
                xmin: snapshot.tx_id,
                xmax: None,
            });
        }

        Ok(true)
    }

    pub fn delete(&mut self, id: i64, snapshot: &Snapshot) -> Result<bool> {
        self.check_lock(id, snapshot.tx_id)?;

        let Some(idx) = self.visible_index(id, snapshot) else {
            return Ok(false);
        };
        self.check_not_superseded(id, idx, snapshot)?;

        if let Some(versions) = self.rows.get_mut(&id) {
            versions[idx].xmax = Some(snapshot.tx_id);
        }
        Ok(true)
    }

    pub fn scan(&self, snapshot: &Snapshot) -> Vec<Row> {
        self.rows
            .values()
            .filter_map(|versions| self.visible_version(versions, snapshot))
            .collect()
    }

    pub fn get(&self, id: i64, snapshot: &Snapshot) -> Option<Row> {
        self.rows
            .get(&id)
            .and_then(|versions| self.visible_version(versions, snapshot))
    }

    /// Take the row lock for `owner`. Re-entrant for the same owner.
    pub fn try_lock(&mut self, id: i64, owner: u64) -> bool {
        match self.locks.get(&id) {
            Some(current) if *current != owner => false,
            _ => {
                self.locks.insert(id, owner);
                true
            }
        }
    }

    pub fn lock_owner(&self, id: i64) -> Option<u64> {
        self.locks.get(&id).copied()
    }

    /// Drop every lock held by `owner`, returning how many were held.
    pub fn release_locks(&mut self, owner: u64) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, holder| *holder != owner);
        before - self.locks.len()
    }

    pub fn row_count(&self, snapshot: &Snapshot) -> usize {
        self.rows
            .values()
            .filter(|versions| self.visible_version(versions, snapshot).is_some())
            .count()
    }

    fn check_lock(&self, id: i64, tx_id: u64) -> Result<()> {
        match self.locks.get(&id) {
            Some(holder) if *holder != tx_id => Err(RepoError::Transaction(format!(
                "Row {} of '{}' is locked by txn_{}",
                id,
                self.schema.table(),
                holder
            ))),
            _ => Ok(()),
        }
    }

    // First updater wins: a version another live or committed transaction
    // already replaced or deleted cannot be written again.
    fn check_not_superseded(&self, id: i64, idx: usize, snapshot: &Snapshot) -> Result<()> {
        let xmax = self
            .rows
            .get(&id)
            .and_then(|versions| versions.get(idx))
            .and_then(|version| version.xmax);
        match xmax {
            Some(writer) if writer != snapshot.tx_id && !snapshot.aborted.contains(&writer) => {
                Err(RepoError::Transaction(format!(
                    "Row {} of '{}' was changed by concurrent txn_{}",
                    id,
                    self.schema.table(),
                    writer
                )))
            }
            _ => Ok(()),
        }
    }

    // Versions left behind by aborted writers are skipped.
    fn visible_index(&self, id: i64, snapshot: &Snapshot) -> Option<usize> {
        self.rows
            .get(&id)?
            .iter()
            .rposition(|version| self.is_visible(version, snapshot))
    }

    fn visible_version(&self, versions: &[MvccRow], snapshot: &Snapshot) -> Option<Row> {
        versions
            .iter()
            .rev()
            .find(|version| self.is_visible(version, snapshot))
            .map(|version| version.row.clone())
    }

    // A version is "live" when it still blocks a duplicate identifier.
    fn is_version_live(&self, row: &MvccRow, snapshot: &Snapshot) -> bool {
        if snapshot.aborted.contains(&row.xmin) {
            return false;
        }

        if let Some(xmax) = row.xmax {
            if snapshot.aborted.contains(&xmax) {
                return true;
            }
            if xmax == snapshot.tx_id || self.is_committed(xmax, snapshot) {
                return false;
            }
            // Uncommitted delete by someone else still holds the id
            return true;
        }

        true
    }

    fn is_visible(&self, row: &MvccRow, snapshot: &Snapshot) -> bool {
        if row.xmin == snapshot.tx_id {
            if let Some(xmax) = row.xmax
                && xmax == snapshot.tx_id
            {
                return false;
            }
            return true;
        }

        if !self.is_committed(row.xmin, snapshot) {
            return false;
        }

        if let Some(xmax) = row.xmax {
            if xmax == snapshot.tx_id {
                return false;
            }
            if self.is_committed(xmax, snapshot) {
                return false;
            }
        }

        true
    }

    fn is_committed(&self, tx_id: u64, snapshot: &Snapshot) -> bool {
        if tx_id >= snapshot.max_tx_id {
            return false;
        }
        if snapshot.active.contains(&tx_id) {
            return false;
        }
        if snapshot.aborted.contains(&tx_id) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn table() -> Table {
        Table::new(EntitySchema::new(
            "Team",
            "team",
            "id",
            vec![
                Column::new("id", DataType::Integer),
                Column::new("name", DataType::Text),
            ],
        ))
    }

    fn snapshot(tx_id: u64, active: &[u64]) -> Snapshot {
        Snapshot {
            tx_id,
            active: Arc::new(active.iter().copied().collect()),
            aborted: Arc::new(HashSet::new()),
            max_tx_id: 100,
        }
    }

    #[test]
    fn test_insert_assigns_sequential_ids() {
        let mut table = table();
        let snap = snapshot(1, &[]);
        let a = table.insert(vec![Value::Null, "teamA".into()], &snap).unwrap();
        let b = table.insert(vec![Value::Null, "teamB".into()], &snap).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(table.get(2, &snap).unwrap()[1], Value::Text("teamB".into()));
    }

    #[test]
    fn test_explicit_id_advances_sequence() {
        let mut table = table();
        let snap = snapshot(1, &[]);
        table.insert(vec![Value::Integer(10), "x".into()], &snap).unwrap();
        let next = table.insert(vec![Value::Null, "y".into()], &snap).unwrap();
        assert_eq!(next, 11);
        assert!(table.insert(vec![Value::Integer(10), "z".into()], &snap).is_err());
    }

    #[test]
    fn test_uncommitted_insert_invisible_to_others() {
        let mut table = table();
        table.insert(vec![Value::Null, "teamA".into()], &snapshot(5, &[5])).unwrap();

        assert_eq!(table.scan(&snapshot(5, &[5])).len(), 1);
        assert!(table.scan(&snapshot(6, &[5])).is_empty());
    }

    #[test]
    fn test_update_keeps_identifier() {
        let mut table = table();
        let snap = snapshot(1, &[]);
        let id = table.insert(vec![Value::Null, "teamA".into()], &snap).unwrap();

        assert!(table.update(id, vec![Value::Integer(id), "renamed".into()], &snap).unwrap());
        assert_eq!(table.get(id, &snap).unwrap()[1], Value::Text("renamed".into()));

        let err = table
            .update(id, vec![Value::Integer(99), "moved".into()], &snap)
            .unwrap_err();
        assert!(matches!(err, RepoError::ConstraintViolation(_)));
    }

    #[test]
    fn test_delete_hides_row() {
        let mut table = table();
        let snap = snapshot(1, &[]);
        let id = table.insert(vec![Value::Null, "teamA".into()], &snap).unwrap();
        assert!(table.delete(id, &snap).unwrap());
        assert!(!table.delete(id, &snap).unwrap());
        assert!(table.get(id, &snap).is_none());
        assert_eq!(table.row_count(&snap), 0);
    }

    #[test]
    fn test_aborted_update_does_not_hide_row() {
        let mut table = table();
        let id = table.insert(vec![Value::Null, "teamA".into()], &snapshot(1, &[])).unwrap();
        table
            .update(id, vec![Value::Integer(id), "lost".into()], &snapshot(2, &[2]))
            .unwrap();

        let after_abort = Snapshot {
            aborted: Arc::new([2].into_iter().collect()),
            ..snapshot(3, &[])
        };
        assert_eq!(table.get(id, &after_abort).unwrap()[1], Value::Text("teamA".into()));
        assert!(table.update(id, vec![Value::Integer(id), "kept".into()], &after_abort).unwrap());
        assert_eq!(table.get(id, &after_abort).unwrap()[1], Value::Text("kept".into()));
    }

    #[test]
    fn test_locks_block_other_writers() {
        let mut table = table();
        let id = table.insert(vec![Value::Null, "teamA".into()], &snapshot(1, &[])).unwrap();

        assert!(table.try_lock(id, 2));
        assert!(table.try_lock(id, 2));
        assert!(!table.try_lock(id, 3));

        let err = table
            .update(id, vec![Value::Integer(id), "x".into()], &snapshot(3, &[2]))
            .unwrap_err();
        assert!(matches!(err, RepoError::Transaction(_)));

        assert_eq!(table.release_locks(2), 1);
        assert!(table.try_lock(id, 3));
    }

    #[test]
    fn test_first_updater_wins() {
        let mut table = table();
        let id = table.insert(vec![Value::Null, "teamA".into()], &snapshot(1, &[])).unwrap();

        // txn 2 and 3 both started before either wrote
        let second = snapshot(2, &[3]);
        let third = snapshot(3, &[2]);
        assert!(table.update(id, vec![Value::Integer(id), "by 2".into()], &second).unwrap());

        let err = table
            .update(id, vec![Value::Integer(id), "by 3".into()], &third)
            .unwrap_err();
        assert!(matches!(err, RepoError::Transaction(_)));
        assert!(matches!(table.delete(id, &third), Err(RepoError::Transaction(_))));

        // Once txn 2 is known committed, a fresh snapshot writes the head version
        let latest = snapshot(3, &[]);
        assert_eq!(table.get(id, &latest).unwrap()[1], Value::Text("by 2".into()));
        assert!(table.update(id, vec![Value::Integer(id), "by 3".into()], &latest).unwrap());
        assert_eq!(table.get(id, &latest).unwrap()[1], Value::Text("by 3".into()));
    }
}
