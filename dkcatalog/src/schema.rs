pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    file_id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    original_path           TEXT    NOT NULL,
    file_size               INTEGER NOT NULL,
    chunk_size              INTEGER NOT NULL,
    chunk_count             INTEGER NOT NULL,
    cipher_mode             TEXT    NOT NULL,
    encryption_key          BLOB    NOT NULL,
    encryption_nonce_seed   BLOB    NOT NULL,
    created_at              TEXT    NOT NULL,
    status                  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id         INTEGER NOT NULL REFERENCES files(file_id),
    chunk_index     INTEGER NOT NULL,
    chunk_size      INTEGER NOT NULL,
    backend_name    TEXT    NOT NULL,
    remote_key      TEXT    NOT NULL,
    checksum        TEXT    NOT NULL,
    status          TEXT    NOT NULL,
    UNIQUE (file_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id);
"#;
