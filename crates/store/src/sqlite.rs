use rusqlite::{Connection, OptionalExtension};

use fieldwork_core::{Document, ResourceId, RevisionId};

use crate::error::StoreError;
use crate::traits::{Change, DocumentStore, RevisionEntry};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StoreError> {
    v.try_into()
        .map_err(|_| StoreError::Serialization(format!("invalid {label} length")))
}

fn read_rev(bytes: Vec<u8>, label: &str) -> Result<RevisionId, StoreError> {
    Ok(RevisionId::from_bytes(&to_array::<36>(bytes, label)?))
}

fn read_id(bytes: Vec<u8>, label: &str) -> Result<ResourceId, StoreError> {
    Ok(ResourceId::from_bytes(to_array::<16>(bytes, label)?))
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn load_body(
        conn: &Connection,
        id: ResourceId,
        rev: &RevisionId,
    ) -> Result<Document, StoreError> {
        let body: Option<Vec<u8>> = conn
            .query_row(
                "SELECT body FROM revisions WHERE doc_id = ?1 AND rev = ?2",
                rusqlite::params![id.as_bytes().as_slice(), &rev.to_bytes()[..]],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let body = body.ok_or_else(|| StoreError::RevisionNotFound {
            id: id.to_string(),
            revision: rev.to_string(),
        })?;
        let mut document = Document::from_body_bytes(&body)?;
        document.revision_id = Some(*rev);
        Ok(document)
    }

    fn put_inner(
        &mut self,
        document: &Document,
        expected_rev: Option<&RevisionId>,
        squash: &[RevisionId],
    ) -> Result<Document, StoreError> {
        let id = document.id();
        let body = document.body_bytes()?;
        let tx = self.conn.transaction()?;

        for rev in squash {
            tx.execute(
                "UPDATE revisions SET superseded = 1 WHERE doc_id = ?1 AND rev = ?2",
                rusqlite::params![id.as_bytes().as_slice(), &rev.to_bytes()[..]],
            )?;
        }

        let leaves = live_leaves(&tx, id)?;
        let (new_rev, parent) = match expected_rev {
            Some(expected) => {
                if !leaves.iter().any(|(rev, _)| rev == expected) {
                    return Err(if leaves.is_empty() {
                        StoreError::DocumentNotFound(id.to_string())
                    } else {
                        StoreError::SaveConflict { id: id.to_string() }
                    });
                }
                (RevisionId::child(expected, &body), Some(*expected))
            }
            None => {
                if leaves.is_empty() {
                    (RevisionId::root(&body), None)
                } else if leaves.iter().all(|(_, deleted)| *deleted) {
                    // Recreation on top of a tombstone keeps the revision
                    // tree connected, so replication converges.
                    let base = leaves.iter().map(|(rev, _)| *rev).max().unwrap();
                    (RevisionId::child(&base, &body), Some(base))
                } else {
                    return Err(StoreError::SaveConflict { id: id.to_string() });
                }
            }
        };

        insert_revision(
            &tx,
            &RevisionEntry {
                id,
                rev: new_rev,
                parent,
                body: Some(body),
                deleted: false,
                superseded: false,
            },
        )?;
        recompute_winner(&tx, id)?;
        append_change(&tx, id, &new_rev, false)?;
        tx.commit()?;

        let mut written = document.clone();
        written.revision_id = Some(new_rev);
        written.conflicts = Vec::new();
        Ok(written)
    }

    fn conflicting_leaves(
        conn: &Connection,
        id: ResourceId,
        winning: &RevisionId,
    ) -> Result<Vec<RevisionId>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT rev FROM revisions
             WHERE doc_id = ?1 AND leaf = 1 AND superseded = 0 AND deleted = 0 AND rev != ?2
             ORDER BY rev",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![id.as_bytes().as_slice(), &winning.to_bytes()[..]],
            |row| row.get::<_, Vec<u8>>(0),
        )?;
        let mut result = Vec::new();
        for row in rows {
            result.push(read_rev(row?, "rev")?);
        }
        Ok(result)
    }
}

fn live_leaves(
    conn: &Connection,
    id: ResourceId,
) -> Result<Vec<(RevisionId, bool)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT rev, deleted FROM revisions WHERE doc_id = ?1 AND leaf = 1 AND superseded = 0",
    )?;
    let rows = stmt.query_map(rusqlite::params![id.as_bytes().as_slice()], |row| {
        Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, bool>(1)?))
    })?;
    let mut result = Vec::new();
    for row in rows {
        let (rev_bytes, deleted) = row?;
        result.push((read_rev(rev_bytes, "rev")?, deleted));
    }
    Ok(result)
}

fn insert_revision(conn: &Connection, entry: &RevisionEntry) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO revisions (doc_id, rev, parent_rev, generation, body, leaf, deleted, superseded)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)",
        rusqlite::params![
            entry.id.as_bytes().as_slice(),
            &entry.rev.to_bytes()[..],
            entry.parent.map(|p| p.to_bytes().to_vec()),
            entry.rev.generation(),
            entry.body.as_deref(),
            entry.deleted,
            entry.superseded,
        ],
    )?;
    if let Some(parent) = &entry.parent {
        conn.execute(
            "UPDATE revisions SET leaf = 0 WHERE doc_id = ?1 AND rev = ?2",
            rusqlite::params![entry.id.as_bytes().as_slice(), &parent.to_bytes()[..]],
        )?;
    }
    Ok(())
}

/// Elects the winning revision among live leaves: the highest non-deleted
/// leaf by (generation, digest), falling back to the highest tombstone when
/// every live leaf is deleted. Deterministic, so every replica agrees.
fn recompute_winner(conn: &Connection, id: ResourceId) -> Result<(), StoreError> {
    let leaves = live_leaves(conn, id)?;
    let winner = leaves
        .iter()
        .filter(|(_, deleted)| !deleted)
        .map(|(rev, _)| *rev)
        .max();
    let (winning, deleted) = match winner {
        Some(rev) => (rev, false),
        None => {
            let Some(tombstone) = leaves.iter().map(|(rev, _)| *rev).max() else {
                return Ok(());
            };
            (tombstone, true)
        }
    };
    conn.execute(
        "INSERT INTO documents (doc_id, winning_rev, deleted) VALUES (?1, ?2, ?3)
         ON CONFLICT(doc_id) DO UPDATE SET winning_rev = excluded.winning_rev, deleted = excluded.deleted",
        rusqlite::params![
            id.as_bytes().as_slice(),
            &winning.to_bytes()[..],
            deleted
        ],
    )?;
    Ok(())
}

fn append_change(
    conn: &Connection,
    id: ResourceId,
    rev: &RevisionId,
    deleted: bool,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO changes (doc_id, rev, deleted) VALUES (?1, ?2, ?3)",
        rusqlite::params![id.as_bytes().as_slice(), &rev.to_bytes()[..], deleted],
    )?;
    Ok(())
}

impl DocumentStore for SqliteStore {
    fn fetch(&self, id: ResourceId) -> Result<Document, StoreError> {
        let row: Option<(Vec<u8>, bool)> = self
            .conn
            .query_row(
                "SELECT winning_rev, deleted FROM documents WHERE doc_id = ?1",
                rusqlite::params![id.as_bytes().as_slice()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (winning_bytes, deleted) = match row {
            Some(row) => row,
            None => return Err(StoreError::DocumentNotFound(id.to_string())),
        };
        if deleted {
            return Err(StoreError::DocumentNotFound(id.to_string()));
        }
        let winning = read_rev(winning_bytes, "winning_rev")?;
        let mut document = Self::load_body(&self.conn, id, &winning)?;
        document.conflicts = Self::conflicting_leaves(&self.conn, id, &winning)?;
        Ok(document)
    }

    fn fetch_revision(
        &self,
        id: ResourceId,
        rev: &RevisionId,
    ) -> Result<Document, StoreError> {
        Self::load_body(&self.conn, id, rev)
    }

    fn put(
        &mut self,
        document: &Document,
        expected_rev: Option<&RevisionId>,
    ) -> Result<Document, StoreError> {
        self.put_inner(document, expected_rev, &[])
    }

    fn put_resolving(
        &mut self,
        document: &Document,
        squash: &[RevisionId],
    ) -> Result<Document, StoreError> {
        self.put_inner(document, document.revision_id.as_ref(), squash)
    }

    fn remove(&mut self, id: ResourceId, expected_rev: &RevisionId) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        let deleted: Option<bool> = tx
            .query_row(
                "SELECT deleted FROM documents WHERE doc_id = ?1",
                rusqlite::params![id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        match deleted {
            None | Some(true) => return Err(StoreError::DocumentNotFound(id.to_string())),
            Some(false) => {}
        }

        let leaves = live_leaves(&tx, id)?;
        if !leaves.iter().any(|(rev, _)| rev == expected_rev) {
            return Err(StoreError::SaveConflict { id: id.to_string() });
        }

        let tombstone = RevisionId::child(expected_rev, &[]);
        insert_revision(
            &tx,
            &RevisionEntry {
                id,
                rev: tombstone,
                parent: Some(*expected_rev),
                body: None,
                deleted: true,
                superseded: false,
            },
        )?;
        recompute_winner(&tx, id)?;
        append_change(&tx, id, &tombstone, true)?;
        tx.commit()?;
        Ok(())
    }

    fn find_ids(&self) -> Result<Vec<ResourceId>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT doc_id FROM documents WHERE deleted = 0")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(read_id(row?, "doc_id")?);
        }
        Ok(result)
    }

    fn all_documents(&self) -> Result<Vec<Document>, StoreError> {
        let mut result = Vec::new();
        for id in self.find_ids()? {
            result.push(self.fetch(id)?);
        }
        Ok(result)
    }

    fn changes_since(&self, since: u64) -> Result<(Vec<Change>, u64), StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, doc_id, rev, deleted FROM changes WHERE seq > ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(rusqlite::params![since as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;
        let mut changes = Vec::new();
        let mut last_seq = since;
        for row in rows {
            let (seq, id_bytes, rev_bytes, deleted) = row?;
            let seq = seq as u64;
            last_seq = last_seq.max(seq);
            changes.push(Change {
                seq,
                id: read_id(id_bytes, "doc_id")?,
                rev: read_rev(rev_bytes, "rev")?,
                deleted,
            });
        }
        Ok((changes, last_seq))
    }

    fn revision_tree(&self, id: ResourceId) -> Result<Vec<RevisionEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT rev, parent_rev, body, deleted, superseded FROM revisions
             WHERE doc_id = ?1 ORDER BY generation, rev",
        )?;
        let rows = stmt.query_map(rusqlite::params![id.as_bytes().as_slice()], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Option<Vec<u8>>>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let (rev_bytes, parent_bytes, body, deleted, superseded) = row?;
            result.push(RevisionEntry {
                id,
                rev: read_rev(rev_bytes, "rev")?,
                parent: parent_bytes
                    .map(|bytes| read_rev(bytes, "parent_rev"))
                    .transpose()?,
                body,
                deleted,
                superseded,
            });
        }
        Ok(result)
    }

    fn ingest_revision(&mut self, entry: &RevisionEntry) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;

        let known: Option<bool> = tx
            .query_row(
                "SELECT superseded FROM revisions WHERE doc_id = ?1 AND rev = ?2",
                rusqlite::params![entry.id.as_bytes().as_slice(), &entry.rev.to_bytes()[..]],
                |row| row.get(0),
            )
            .optional()?;

        match known {
            Some(superseded) => {
                // Known revision: only a newly raised superseded flag (a
                // remote conflict resolution) changes anything locally.
                if !entry.superseded || superseded {
                    return Ok(false);
                }
                tx.execute(
                    "UPDATE revisions SET superseded = 1 WHERE doc_id = ?1 AND rev = ?2",
                    rusqlite::params![
                        entry.id.as_bytes().as_slice(),
                        &entry.rev.to_bytes()[..]
                    ],
                )?;
            }
            None => {
                if let Some(parent) = &entry.parent {
                    let parent_known: Option<i64> = tx
                        .query_row(
                            "SELECT 1 FROM revisions WHERE doc_id = ?1 AND rev = ?2",
                            rusqlite::params![
                                entry.id.as_bytes().as_slice(),
                                &parent.to_bytes()[..]
                            ],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if parent_known.is_none() {
                        return Err(StoreError::MissingAncestor {
                            id: entry.id.to_string(),
                            revision: parent.to_string(),
                        });
                    }
                }
                insert_revision(&tx, entry)?;
            }
        }

        recompute_winner(&tx, entry.id)?;
        append_change(&tx, entry.id, &entry.rev, entry.deleted)?;
        tx.commit()?;
        Ok(true)
    }
}
