use std::collections::HashMap;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params, params_from_iter};
use uuid::Uuid;

use plaint_types::models::{
    AcademicYears, Attachment, ChatMessage, ChatRoom, Complaint, ComplaintStatus, IndexInfo,
    LastMessage, ResolutionResponse, Role, StudentProfile, User,
};

use crate::models::{AttachmentRow, UserRow};
use crate::{CHAT_INDEX, Database, IndexSpec, MissingIndex, ROOM_MESSAGE_INDEX, format_ts, now};

const USER_COLUMNS: &str = "id, username, email, password, role, first_name, last_name, unique_id, \
     department, program, batch, attending, year_start, year_end, created_at, created_by";

const COMPLAINT_COLUMNS: &str = "id, title, category, subcategory, description, student_id, username, \
     department, semester, status, assigned_to, student_confirmed, resolution_response, created_at, updated_at";

/// Selection for `list_complaints`. Empty status lists mean "any".
#[derive(Debug, Default, Clone)]
pub struct ComplaintFilter {
    pub student_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub statuses: Vec<ComplaintStatus>,
    pub exclude_statuses: Vec<ComplaintStatus>,
}

impl Database {
    // -- Users --

    /// Insert a user unless the username or email is taken. Returns false
    /// on a clash. The check and the insert share one transaction.
    pub fn create_user(&self, user: &User, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if user_exists(&tx, user)? {
                return Ok(false);
            }
            insert_user(&tx, user, password_hash)?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Insert the first admin account. Returns false once any admin exists
    /// or the name is taken.
    pub fn create_first_admin(&self, user: &User, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if has_admin(&tx)? || user_exists(&tx, user)? {
                return Ok(false);
            }
            insert_user(&tx, user, password_hash)?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                    [username],
                    user_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    pub fn list_users(&self, role: Option<Role>) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users WHERE (?1 IS NULL OR role = ?1) ORDER BY created_at DESC",
                USER_COLUMNS
            ))?;
            let rows = stmt
                .query_map([role.map(Role::as_str)], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(|r| r.user).collect())
        })
    }

    // -- Complaints --

    pub fn insert_complaint(&self, c: &Complaint) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO complaints ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)", COMPLAINT_COLUMNS),
                params![
                    c.id.to_string(),
                    c.title,
                    c.category,
                    c.subcategory,
                    c.description,
                    c.student_id.to_string(),
                    c.username,
                    c.department,
                    c.semester,
                    c.status.as_str(),
                    c.assigned_to.map(|id| id.to_string()),
                    c.student_confirmed,
                    c.resolution_response.map(ResolutionResponse::as_str),
                    format_ts(c.created_at),
                    format_ts(c.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_complaint(&self, id: Uuid) -> Result<Option<Complaint>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM complaints WHERE id = ?1", COMPLAINT_COLUMNS),
                    [id.to_string()],
                    complaint_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Complaints matching `filter`, newest first by creation time.
    pub fn list_complaints(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(student_id) = filter.student_id {
            values.push(student_id.to_string());
            clauses.push(format!("student_id = ?{}", values.len()));
        }
        if let Some(assigned_to) = filter.assigned_to {
            values.push(assigned_to.to_string());
            clauses.push(format!("assigned_to = ?{}", values.len()));
        }
        for (statuses, op) in [(&filter.statuses, "IN"), (&filter.exclude_statuses, "NOT IN")] {
            if statuses.is_empty() {
                continue;
            }
            let mut placeholders = Vec::with_capacity(statuses.len());
            for status in statuses {
                values.push(status.as_str().to_string());
                placeholders.push(format!("?{}", values.len()));
            }
            clauses.push(format!("status {} ({})", op, placeholders.join(", ")));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM complaints {} ORDER BY created_at DESC",
            COMPLAINT_COLUMNS, where_sql
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), complaint_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Hand a complaint to a faculty member and move it under review.
    pub fn assign_complaint(&self, id: Uuid, faculty_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE complaints SET status = ?2, assigned_to = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    id.to_string(),
                    ComplaintStatus::UnderReview.as_str(),
                    faculty_id.to_string(),
                    format_ts(at),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn update_complaint_status(&self, id: Uuid, status: ComplaintStatus, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE complaints SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), status.as_str(), format_ts(at)],
            )?;
            Ok(changed > 0)
        })
    }

    /// Store the student's answer to a proposed resolution.
    pub fn record_resolution(
        &self,
        id: Uuid,
        response: ResolutionResponse,
        status: ComplaintStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE complaints
                 SET student_confirmed = 1, resolution_response = ?2, status = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![id.to_string(), response.as_str(), status.as_str(), format_ts(at)],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Complaint chat --

    pub fn insert_chat(&self, msg: &ChatMessage) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (id, complaint_id, text, sender_id, sender_name, sender_role, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    msg.id.to_string(),
                    msg.thread_id.to_string(),
                    msg.text,
                    msg.sender_id.to_string(),
                    msg.sender_name,
                    msg.sender_role,
                    format_ts(msg.timestamp),
                ],
            )?;
            Ok(())
        })
    }

    /// Messages of a complaint thread.
    ///
    /// `ordered` queries sort by timestamp and fail with [`MissingIndex`]
    /// until the `chats` compound index is ready. Unordered queries return
    /// insertion order and always succeed.
    pub fn query_chats(&self, complaint_id: Uuid, ordered: bool, limit: Option<u32>) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            if ordered {
                ensure_index(conn, CHAT_INDEX)?;
            }
            let sql = format!(
                "SELECT id, complaint_id, text, sender_id, sender_name, sender_role, timestamp
                 FROM chats WHERE complaint_id = ?1 {}",
                order_and_limit(ordered, limit)
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut messages = stmt
                .query_map([complaint_id.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            load_reads(conn, &mut messages)?;
            Ok(messages)
        })
    }

    /// Remove a complaint's whole thread. Returns the number of messages deleted.
    pub fn delete_chats(&self, complaint_id: Uuid) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM message_reads
                 WHERE message_id IN (SELECT id FROM chats WHERE complaint_id = ?1)",
                [complaint_id.to_string()],
            )?;
            let deleted = tx.execute("DELETE FROM chats WHERE complaint_id = ?1", [complaint_id.to_string()])?;
            tx.commit()?;
            Ok(deleted)
        })
    }

    /// Mark the given thread messages as read by `user_id`. Own messages and
    /// ids from other threads are ignored.
    pub fn mark_chats_read(&self, complaint_id: Uuid, user_id: Uuid, message_ids: &[Uuid]) -> Result<usize> {
        self.with_conn(|conn| {
            let mut marked = 0;
            for id in message_ids {
                marked += conn.execute(
                    "INSERT OR IGNORE INTO message_reads (message_id, user_id)
                     SELECT id, ?2 FROM chats WHERE complaint_id = ?1 AND id = ?3 AND sender_id != ?2",
                    params![complaint_id.to_string(), user_id.to_string(), id.to_string()],
                )?;
            }
            Ok(marked)
        })
    }

    // -- Chat rooms --

    pub fn create_room(&self, room: &ChatRoom) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chat_rooms (id, complaint_id, complaint_title, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    room.id.to_string(),
                    room.complaint_id.to_string(),
                    room.complaint_title,
                    format_ts(room.created_at),
                ],
            )?;
            for user_id in &room.participants {
                tx.execute(
                    "INSERT OR IGNORE INTO room_participants (room_id, user_id) VALUES (?1, ?2)",
                    params![room.id.to_string(), user_id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_room(&self, id: Uuid) -> Result<Option<ChatRoom>> {
        self.with_conn(|conn| query_room(conn, "id", &id.to_string()))
    }

    pub fn get_room_by_complaint(&self, complaint_id: Uuid) -> Result<Option<ChatRoom>> {
        self.with_conn(|conn| query_room(conn, "complaint_id", &complaint_id.to_string()))
    }

    /// Rooms `user_id` takes part in, most recently active first.
    pub fn list_rooms_for_user(&self, user_id: Uuid) -> Result<Vec<ChatRoom>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id FROM chat_rooms r
                 JOIN room_participants p ON p.room_id = r.id
                 WHERE p.user_id = ?1
                 ORDER BY COALESCE(r.last_timestamp, r.created_at) DESC",
            )?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut rooms = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(room) = query_room(conn, "id", &id)? {
                    rooms.push(room);
                }
            }
            Ok(rooms)
        })
    }

    /// Append a room message with its attachments, refresh the room summary
    /// and bump every other participant's unread counter.
    pub fn insert_room_message(&self, msg: &ChatMessage, attachments: &[AttachmentRow]) -> Result<()> {
        let summary = if msg.text.is_empty() && !attachments.is_empty() {
            format!("Shared {} file(s)", attachments.len())
        } else {
            msg.text.clone()
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chat_messages (id, room_id, content, sender_id, sender_name, sender_role, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    msg.id.to_string(),
                    msg.thread_id.to_string(),
                    msg.text,
                    msg.sender_id.to_string(),
                    msg.sender_name,
                    msg.sender_role,
                    format_ts(msg.timestamp),
                ],
            )?;
            for a in attachments {
                tx.execute(
                    "INSERT INTO attachments (id, message_id, room_id, uploader_id, name, content_type, size, sha256, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        a.attachment.id.to_string(),
                        msg.id.to_string(),
                        a.room_id.to_string(),
                        a.uploader_id.to_string(),
                        a.attachment.name,
                        a.attachment.content_type,
                        a.attachment.size as i64,
                        a.sha256,
                        format_ts(msg.timestamp),
                    ],
                )?;
            }
            tx.execute(
                "UPDATE chat_rooms SET last_content = ?2, last_timestamp = ?3, last_sender_id = ?4 WHERE id = ?1",
                params![
                    msg.thread_id.to_string(),
                    summary,
                    format_ts(msg.timestamp),
                    msg.sender_id.to_string(),
                ],
            )?;
            tx.execute(
                "UPDATE room_participants SET unread = unread + 1 WHERE room_id = ?1 AND user_id != ?2",
                params![msg.thread_id.to_string(), msg.sender_id.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Messages of a room. Same index rule as [`Database::query_chats`],
    /// against the `chatMessages` index.
    pub fn query_room_messages(&self, room_id: Uuid, ordered: bool, limit: Option<u32>) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            if ordered {
                ensure_index(conn, ROOM_MESSAGE_INDEX)?;
            }
            let sql = format!(
                "SELECT id, room_id, content, sender_id, sender_name, sender_role, timestamp
                 FROM chat_messages WHERE room_id = ?1 {}",
                order_and_limit(ordered, limit)
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut messages = stmt
                .query_map([room_id.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            load_reads(conn, &mut messages)?;
            load_attachments(conn, &mut messages)?;
            Ok(messages)
        })
    }

    /// Mark every room message from others read by `user_id` and recount the
    /// user's unread counter. Returns the new count.
    pub fn mark_room_read(&self, room_id: Uuid, user_id: Uuid) -> Result<u32> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let room = room_id.to_string();
            let user = user_id.to_string();
            tx.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id)
                 SELECT id, ?2 FROM chat_messages WHERE room_id = ?1 AND sender_id != ?2",
                params![room, user],
            )?;
            let unread: i64 = tx.query_row(
                "SELECT COUNT(*) FROM chat_messages m
                 WHERE m.room_id = ?1 AND m.sender_id != ?2
                   AND NOT EXISTS (SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = ?2)",
                params![room, user],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE room_participants SET unread = ?3 WHERE room_id = ?1 AND user_id = ?2",
                params![room, user, unread],
            )?;
            tx.commit()?;
            Ok(unread as u32)
        })
    }

    pub fn get_attachment(&self, id: Uuid) -> Result<Option<AttachmentRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, room_id, uploader_id, name, content_type, size, sha256
                     FROM attachments WHERE id = ?1",
                    [id.to_string()],
                    |row| {
                        let id: Uuid = parsed(row, 0)?;
                        Ok(AttachmentRow {
                            attachment: Attachment {
                                id,
                                name: row.get(3)?,
                                content_type: row.get(4)?,
                                size: row.get::<_, i64>(5)? as u64,
                                url: attachment_url(id),
                            },
                            room_id: parsed(row, 1)?,
                            uploader_id: parsed(row, 2)?,
                            sha256: row.get(6)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Indexes --

    /// Register a compound index. Re-creating an existing index keeps the
    /// original build schedule.
    pub fn create_index(&self, collection: &str, fields: &[String], ready_at: DateTime<Utc>) -> Result<IndexInfo> {
        let joined = fields.join(",");
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO indexes (collection, fields, created_at, ready_at) VALUES (?1, ?2, ?3, ?4)",
                params![collection, joined, format_ts(now()), format_ts(ready_at)],
            )?;
            let info = conn.query_row(
                "SELECT collection, fields, created_at, ready_at FROM indexes WHERE collection = ?1 AND fields = ?2",
                params![collection, joined],
                index_from_row,
            )?;
            Ok(info)
        })
    }

    pub fn list_indexes(&self) -> Result<Vec<IndexInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT collection, fields, created_at, ready_at FROM indexes ORDER BY collection, fields",
            )?;
            let rows = stmt
                .query_map([], index_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

}

fn insert_user(conn: &Connection, user: &User, password_hash: &str) -> Result<()> {
    let student = user.student.as_ref();
    conn.execute(
        &format!("INSERT INTO users ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)", USER_COLUMNS),
        params![
            user.id.to_string(),
            user.username,
            user.email,
            password_hash,
            user.role.as_str(),
            user.first_name,
            user.last_name,
            user.unique_id,
            user.department,
            student.map(|s| s.program.as_str()),
            student.map(|s| s.batch.as_str()),
            student.map(|s| s.attending.as_str()),
            student.map(|s| s.academic_years.start),
            student.map(|s| s.academic_years.end),
            format_ts(user.created_at),
            user.created_by.map(|id| id.to_string()),
        ],
    )?;
    Ok(())
}

fn user_exists(conn: &Connection, user: &User) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE username = ?1 OR email = ?2",
        params![user.username, user.email],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn has_admin(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = 'admin'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn attachment_url(id: Uuid) -> String {
    format!("/attachments/{}", id)
}

fn ensure_index(conn: &Connection, spec: IndexSpec) -> Result<()> {
    if query_index_ready(conn, spec)? {
        Ok(())
    } else {
        Err(MissingIndex::from_spec(spec).into())
    }
}

fn query_index_ready(conn: &Connection, spec: IndexSpec) -> Result<bool> {
    let ready_at: Option<DateTime<Utc>> = conn
        .query_row(
            "SELECT ready_at FROM indexes WHERE collection = ?1 AND fields = ?2",
            params![spec.collection, spec.fields.join(",")],
            |row| ts(row, 0),
        )
        .optional()?;
    Ok(ready_at.is_some_and(|at| at <= Utc::now()))
}

fn order_and_limit(ordered: bool, limit: Option<u32>) -> String {
    let order = if ordered {
        "ORDER BY timestamp ASC, rowid ASC"
    } else {
        "ORDER BY rowid ASC"
    };
    match limit {
        Some(limit) => format!("{} LIMIT {}", order, limit),
        None => order.to_string(),
    }
}

fn query_user(conn: &Connection, id: Uuid) -> Result<Option<User>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            [id.to_string()],
            user_from_row,
        )
        .optional()?;
    Ok(row.map(|r| r.user))
}

fn query_room(conn: &Connection, column: &str, value: &str) -> Result<Option<ChatRoom>> {
    let sql = format!(
        "SELECT id, complaint_id, complaint_title, created_at, last_content, last_timestamp, last_sender_id
         FROM chat_rooms WHERE {} = ?1",
        column
    );
    let room = conn
        .query_row(&sql, [value], |row| {
            let last_message = match (
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ) {
                (Some(content), Some(_), Some(_)) => Some(LastMessage {
                    content,
                    timestamp: ts(row, 5)?,
                    sender_id: parsed(row, 6)?,
                }),
                _ => None,
            };
            Ok(ChatRoom {
                id: parsed(row, 0)?,
                complaint_id: parsed(row, 1)?,
                complaint_title: row.get(2)?,
                participants: Vec::new(),
                created_at: ts(row, 3)?,
                last_message,
                unread_count: HashMap::new(),
            })
        })
        .optional()?;

    let Some(mut room) = room else {
        return Ok(None);
    };

    let mut stmt = conn.prepare("SELECT user_id, unread FROM room_participants WHERE room_id = ?1 ORDER BY rowid")?;
    let participants = stmt
        .query_map([room.id.to_string()], |row| {
            Ok((parsed::<Uuid>(row, 0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (user_id, unread) in participants {
        room.participants.push(user_id);
        room.unread_count.insert(user_id, unread as u32);
    }
    Ok(Some(room))
}

/// Batch-fill `read_by` for a set of messages.
fn load_reads(conn: &Connection, messages: &mut [ChatMessage]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();
    let sql = format!(
        "SELECT message_id, user_id FROM message_reads WHERE message_id IN ({}) ORDER BY rowid",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), |row| {
            Ok((parsed::<Uuid>(row, 0)?, parsed::<Uuid>(row, 1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut by_message: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (message_id, user_id) in rows {
        by_message.entry(message_id).or_default().push(user_id);
    }
    for message in messages.iter_mut() {
        message.read_by = by_message.remove(&message.id).unwrap_or_default();
    }
    Ok(())
}

/// Batch-fill `attachments` for a set of room messages.
fn load_attachments(conn: &Connection, messages: &mut [ChatMessage]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();
    let sql = format!(
        "SELECT id, message_id, name, content_type, size FROM attachments WHERE message_id IN ({}) ORDER BY rowid",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), |row| {
            let id: Uuid = parsed(row, 0)?;
            Ok((
                parsed::<Uuid>(row, 1)?,
                Attachment {
                    id,
                    name: row.get(2)?,
                    content_type: row.get(3)?,
                    size: row.get::<_, i64>(4)? as u64,
                    url: attachment_url(id),
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut by_message: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
    for (message_id, attachment) in rows {
        by_message.entry(message_id).or_default().push(attachment);
    }
    for message in messages.iter_mut() {
        message.attachments = by_message.remove(&message.id).unwrap_or_default();
    }
    Ok(())
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    let role: Role = parsed(row, 4)?;
    let program: Option<String> = row.get(9)?;
    let student = match (role, program) {
        (Role::Student, Some(program)) => Some(StudentProfile {
            program,
            batch: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
            attending: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            academic_years: AcademicYears {
                start: row.get::<_, Option<i32>>(12)?.unwrap_or_default(),
                end: row.get::<_, Option<i32>>(13)?.unwrap_or_default(),
            },
        }),
        _ => None,
    };

    Ok(UserRow {
        user: User {
            id: parsed(row, 0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            role,
            first_name: row.get(5)?,
            last_name: row.get(6)?,
            unique_id: row.get(7)?,
            department: row.get(8)?,
            student,
            created_at: ts(row, 14)?,
            created_by: opt_parsed(row, 15)?,
        },
        password: row.get(3)?,
    })
}

fn complaint_from_row(row: &Row<'_>) -> rusqlite::Result<Complaint> {
    Ok(Complaint {
        id: parsed(row, 0)?,
        title: row.get(1)?,
        category: row.get(2)?,
        subcategory: row.get(3)?,
        description: row.get(4)?,
        student_id: parsed(row, 5)?,
        username: row.get(6)?,
        department: row.get(7)?,
        semester: row.get(8)?,
        status: parsed(row, 9)?,
        assigned_to: opt_parsed(row, 10)?,
        student_confirmed: row.get(11)?,
        resolution_response: opt_parsed(row, 12)?,
        created_at: ts(row, 13)?,
        updated_at: ts(row, 14)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: parsed(row, 0)?,
        thread_id: parsed(row, 1)?,
        text: row.get(2)?,
        sender_id: parsed(row, 3)?,
        sender_name: row.get(4)?,
        sender_role: row.get(5)?,
        timestamp: ts(row, 6)?,
        attachments: Vec::new(),
        read_by: Vec::new(),
    })
}

fn index_from_row(row: &Row<'_>) -> rusqlite::Result<IndexInfo> {
    let fields: String = row.get(1)?;
    let ready_at = ts(row, 3)?;
    Ok(IndexInfo {
        collection: row.get(0)?,
        fields: fields.split(',').map(str::to_string).collect(),
        created_at: ts(row, 2)?,
        ready_at,
        ready: ready_at <= Utc::now(),
    })
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::REQUIRED_INDEXES;

    fn sample_user(username: &str, role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{}@university.edu", username),
            role,
            first_name: "Test".into(),
            last_name: username.to_string(),
            unique_id: format!("U-{}", username),
            department: "Computer Science".into(),
            student: (role == Role::Student).then(|| StudentProfile {
                program: "BS".into(),
                batch: "fall".into(),
                attending: "regular".into(),
                academic_years: AcademicYears { start: 2024, end: 2028 },
            }),
            created_at: now(),
            created_by: None,
        }
    }

    fn user(db: &Database, username: &str, role: Role) -> User {
        let user = sample_user(username, role);
        assert!(db.create_user(&user, "hash").unwrap());
        user
    }

    fn complaint(db: &Database, student: &User) -> Complaint {
        let at = now();
        let c = Complaint {
            id: Uuid::new_v4(),
            title: "Broken projector".into(),
            category: "Facilities and Infrastructure".into(),
            subcategory: "Classroom conditions".into(),
            description: "Room 4 projector is dead".into(),
            student_id: student.id,
            username: student.username.clone(),
            department: student.department.clone(),
            semester: "2".into(),
            status: ComplaintStatus::Pending,
            assigned_to: None,
            student_confirmed: false,
            resolution_response: None,
            created_at: at,
            updated_at: at,
        };
        db.insert_complaint(&c).unwrap();
        c
    }

    fn chat(db: &Database, complaint_id: Uuid, sender: &User, text: &str, at: DateTime<Utc>) -> ChatMessage {
        let msg = ChatMessage {
            id: Uuid::new_v4(),
            thread_id: complaint_id,
            text: text.to_string(),
            sender_id: sender.id,
            sender_name: sender.username.clone(),
            sender_role: sender.role.as_str().to_string(),
            timestamp: at,
            attachments: vec![],
            read_by: vec![],
        };
        db.insert_chat(&msg).unwrap();
        msg
    }

    #[test]
    fn uniqueness_checks_share_the_insert_transaction() {
        let db = Database::open_in_memory().unwrap();
        let root = sample_user("root", Role::Admin);
        assert!(db.create_first_admin(&root, "hash").unwrap());
        assert!(!db.create_first_admin(&sample_user("other", Role::Admin), "hash").unwrap());

        let sara = sample_user("sara", Role::Student);
        assert!(db.create_user(&sara, "hash").unwrap());
        let mut again = sample_user("sara", Role::Faculty);
        again.email = "someone-else@university.edu".into();
        assert!(!db.create_user(&again, "hash").unwrap());
        assert_eq!(db.list_users(None).unwrap().len(), 2);
    }

    #[test]
    fn users_round_trip_with_student_fields() {
        let db = Database::open_in_memory().unwrap();
        let s = user(&db, "sara", Role::Student);

        let row = db.get_user_by_username("sara").unwrap().unwrap();
        assert_eq!(row.password, "hash");
        assert_eq!(row.user.id, s.id);
        assert_eq!(row.user.student, s.student);
        assert_eq!(db.list_users(Some(Role::Student)).unwrap().len(), 1);
        assert_eq!(db.list_users(None).unwrap().len(), 2);
        assert!(db.get_user_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn complaint_filters_and_workflow_updates() {
        let db = Database::open_in_memory().unwrap();
        let s = user(&db, "sara", Role::Student);
        let f = user(&db, "prof", Role::Faculty);
        let a = complaint(&db, &s);
        let b = complaint(&db, &s);

        assert!(db.assign_complaint(a.id, f.id, now()).unwrap());
        let assigned = db
            .list_complaints(&ComplaintFilter { assigned_to: Some(f.id), ..Default::default() })
            .unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].status, ComplaintStatus::UnderReview);

        db.update_complaint_status(b.id, ComplaintStatus::Resolved, now()).unwrap();
        let open = db
            .list_complaints(&ComplaintFilter {
                exclude_statuses: vec![ComplaintStatus::Resolved],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(open.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a.id]);

        db.record_resolution(a.id, ResolutionResponse::Rejected, ComplaintStatus::Active, now())
            .unwrap();
        let a = db.get_complaint(a.id).unwrap().unwrap();
        assert!(a.student_confirmed);
        assert_eq!(a.resolution_response, Some(ResolutionResponse::Rejected));
        assert_eq!(a.status, ComplaintStatus::Active);
    }

    #[test]
    fn ordered_chat_query_needs_ready_index() {
        let db = Database::open_in_memory().unwrap();
        let s = user(&db, "sara", Role::Student);
        let c = complaint(&db, &s);
        let t0 = now();
        chat(&db, c.id, &s, "second", t0 + chrono::Duration::seconds(5));
        chat(&db, c.id, &s, "first", t0);

        let err = db.query_chats(c.id, true, Some(1)).unwrap_err();
        let missing = err.downcast_ref::<MissingIndex>().expect("typed error");
        assert_eq!(missing.collection, "chats");
        assert!(missing.remediation("http://console").contains(
            "http://console/indexes/create?collection=chats&fields=complaintId,timestamp"
        ));

        let unordered = db.query_chats(c.id, false, None).unwrap();
        assert_eq!(unordered.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(), ["second", "first"]);

        // Still building.
        let fields: Vec<String> = CHAT_INDEX.fields.iter().map(|f| f.to_string()).collect();
        let info = db
            .create_index("chats", &fields, now() + chrono::Duration::hours(1))
            .unwrap();
        assert!(!info.ready);
        assert!(db.query_chats(c.id, true, None).is_err());

        db.with_conn(|conn| {
            conn.execute("UPDATE indexes SET ready_at = ?1", [format_ts(now())])?;
            Ok(())
        })
        .unwrap();
        let ordered = db.query_chats(c.id, true, None).unwrap();
        assert_eq!(ordered.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(), ["first", "second"]);
        assert_eq!(db.query_chats(c.id, true, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn chat_reads_and_bulk_delete() {
        let db = Database::open_in_memory().unwrap();
        let s = user(&db, "sara", Role::Student);
        let f = user(&db, "prof", Role::Faculty);
        let c = complaint(&db, &s);
        let mine = chat(&db, c.id, &s, "hello", now());
        let theirs = chat(&db, c.id, &f, "hi", now());

        assert_eq!(db.mark_chats_read(c.id, s.id, &[mine.id, theirs.id]).unwrap(), 1);
        let messages = db.query_chats(c.id, false, None).unwrap();
        assert_eq!(messages[1].read_by, vec![s.id]);
        assert!(messages[0].read_by.is_empty());

        assert_eq!(db.delete_chats(c.id).unwrap(), 2);
        assert!(db.query_chats(c.id, false, None).unwrap().is_empty());
    }

    #[test]
    fn room_messages_track_unread_and_attachments() {
        let db = Database::open_in_memory().unwrap();
        for spec in REQUIRED_INDEXES {
            let fields: Vec<String> = spec.fields.iter().map(|f| f.to_string()).collect();
            db.create_index(spec.collection, &fields, now()).unwrap();
        }
        let s = user(&db, "sara", Role::Student);
        let f = user(&db, "prof", Role::Faculty);
        let c = complaint(&db, &s);
        let room = ChatRoom {
            id: Uuid::new_v4(),
            complaint_id: c.id,
            complaint_title: c.title.clone(),
            participants: vec![s.id, f.id],
            created_at: now(),
            last_message: None,
            unread_count: HashMap::new(),
        };
        db.create_room(&room).unwrap();

        let msg = ChatMessage {
            id: Uuid::new_v4(),
            thread_id: room.id,
            text: String::new(),
            sender_id: f.id,
            sender_name: f.username.clone(),
            sender_role: "faculty".into(),
            timestamp: now(),
            attachments: vec![],
            read_by: vec![],
        };
        let attachment = AttachmentRow {
            attachment: Attachment {
                id: Uuid::new_v4(),
                name: "notes.pdf".into(),
                content_type: "application/pdf".into(),
                size: 3,
                url: String::new(),
            },
            room_id: room.id,
            uploader_id: f.id,
            sha256: "abc".into(),
        };
        db.insert_room_message(&msg, std::slice::from_ref(&attachment)).unwrap();

        let stored = db.get_room(room.id).unwrap().unwrap();
        assert_eq!(stored.unread_count.get(&s.id), Some(&1));
        assert_eq!(stored.unread_count.get(&f.id), Some(&0));
        assert_eq!(stored.last_message.unwrap().content, "Shared 1 file(s)");

        let messages = db.query_room_messages(room.id, true, None).unwrap();
        assert_eq!(messages[0].attachments.len(), 1);
        assert_eq!(messages[0].attachments[0].url, attachment_url(attachment.attachment.id));

        assert_eq!(db.mark_room_read(room.id, s.id).unwrap(), 0);
        assert_eq!(db.get_room(room.id).unwrap().unwrap().unread_count.get(&s.id), Some(&0));
        assert_eq!(db.list_rooms_for_user(s.id).unwrap().len(), 1);
        assert!(db.get_room_by_complaint(c.id).unwrap().is_some());
        assert_eq!(db.get_attachment(attachment.attachment.id).unwrap().unwrap().sha256, "abc");
    }
}
