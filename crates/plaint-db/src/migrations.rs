use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            email           TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            role            TEXT NOT NULL,
            first_name      TEXT NOT NULL DEFAULT '',
            last_name       TEXT NOT NULL DEFAULT '',
            unique_id       TEXT NOT NULL DEFAULT '',
            department      TEXT NOT NULL DEFAULT '',
            program         TEXT,
            batch           TEXT,
            attending       TEXT,
            year_start      INTEGER,
            year_end        INTEGER,
            created_at      TEXT NOT NULL,
            created_by      TEXT
        );

        CREATE TABLE IF NOT EXISTS complaints (
            id                  TEXT PRIMARY KEY,
            title               TEXT NOT NULL,
            category            TEXT NOT NULL,
            subcategory         TEXT NOT NULL,
            description         TEXT NOT NULL,
            student_id          TEXT NOT NULL REFERENCES users(id),
            username            TEXT NOT NULL,
            department          TEXT NOT NULL,
            semester            TEXT NOT NULL,
            status              TEXT NOT NULL,
            assigned_to         TEXT REFERENCES users(id),
            student_confirmed   INTEGER NOT NULL DEFAULT 0,
            resolution_response TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_complaints_student
            ON complaints(student_id);

        CREATE INDEX IF NOT EXISTS idx_complaints_assigned
            ON complaints(assigned_to);

        -- `chats` collection: one thread per complaint
        CREATE TABLE IF NOT EXISTS chats (
            id              TEXT PRIMARY KEY,
            complaint_id    TEXT NOT NULL REFERENCES complaints(id),
            text            TEXT NOT NULL,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            sender_name     TEXT NOT NULL,
            sender_role     TEXT NOT NULL,
            timestamp       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_rooms (
            id                  TEXT PRIMARY KEY,
            complaint_id        TEXT NOT NULL UNIQUE REFERENCES complaints(id),
            complaint_title     TEXT NOT NULL,
            created_at          TEXT NOT NULL,
            last_content        TEXT,
            last_timestamp      TEXT,
            last_sender_id      TEXT
        );

        CREATE TABLE IF NOT EXISTS room_participants (
            room_id     TEXT NOT NULL REFERENCES chat_rooms(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            unread      INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (room_id, user_id)
        );

        -- `chatMessages` collection: messages of chat rooms
        CREATE TABLE IF NOT EXISTS chat_messages (
            id              TEXT PRIMARY KEY,
            room_id         TEXT NOT NULL REFERENCES chat_rooms(id),
            content         TEXT NOT NULL,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            sender_name     TEXT NOT NULL,
            sender_role     TEXT NOT NULL,
            timestamp       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_reads (
            message_id  TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS attachments (
            id              TEXT PRIMARY KEY,
            message_id      TEXT,
            room_id         TEXT NOT NULL REFERENCES chat_rooms(id),
            uploader_id     TEXT NOT NULL REFERENCES users(id),
            name            TEXT NOT NULL,
            content_type    TEXT NOT NULL,
            size            INTEGER NOT NULL,
            sha256          TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_message
            ON attachments(message_id);

        -- Compound index registry for ordered chat queries
        CREATE TABLE IF NOT EXISTS indexes (
            collection  TEXT NOT NULL,
            fields      TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            ready_at    TEXT NOT NULL,
            PRIMARY KEY (collection, fields)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
