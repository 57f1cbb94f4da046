//! Canonical SQLite schema for qcflow.
//!
//! - `item_statuses` and `defect_types` are reference catalogs, seeded once
//! - `items` holds the mutable disposition record per roll or bundle
//! - `item_defects` associates an item with its current defect set
//! - `status_change_requests` (+ `_defects`) and `reviews` are the two
//!   approval envelopes; partial unique indexes allow one PENDING row each
//!   per item
//! - `item_images` records evidence identifiers and their review linkage
//! - `item_events` is the append-only audit trail
//! - `schema_meta` tracks the applied schema version

/// Migration v1: catalogs, items, defects, reviews, images, and the audit log.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS item_statuses (
    status_id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    display_order INTEGER NOT NULL DEFAULT 100,
    is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1))
);

CREATE TABLE IF NOT EXISTS defect_types (
    defect_type_id INTEGER PRIMARY KEY,
    code TEXT UNIQUE,
    name TEXT NOT NULL,
    display_order INTEGER NOT NULL DEFAULT 100,
    is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1))
);

CREATE TABLE IF NOT EXISTS items (
    item_id INTEGER PRIMARY KEY AUTOINCREMENT,
    station TEXT NOT NULL CHECK (station IN ('ROLL', 'BUNDLE')),
    line_id INTEGER NOT NULL,
    product_code TEXT,
    roll_number TEXT,
    bundle_number TEXT,
    job_order_number TEXT,
    roll_id TEXT,
    roll_width REAL,
    detected_at_us INTEGER NOT NULL,
    status_id INTEGER NOT NULL REFERENCES item_statuses(status_id),
    ai_note TEXT,
    acknowledged_by INTEGER,
    acknowledged_at_us INTEGER,
    scrap_requires_qc INTEGER NOT NULL DEFAULT 0 CHECK (scrap_requires_qc IN (0, 1)),
    scrap_confirmed_by INTEGER,
    scrap_confirmed_at_us INTEGER,
    current_review_id INTEGER,
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    deleted_at_us INTEGER
);

CREATE TABLE IF NOT EXISTS item_defects (
    item_defect_id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES items(item_id) ON DELETE CASCADE,
    defect_type_id INTEGER NOT NULL REFERENCES defect_types(defect_type_id) ON DELETE RESTRICT,
    meta_json TEXT,
    created_at_us INTEGER NOT NULL,
    UNIQUE (item_id, defect_type_id)
);

CREATE TABLE IF NOT EXISTS reviews (
    review_id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES items(item_id) ON DELETE CASCADE,
    review_type TEXT NOT NULL
        CHECK (review_type IN ('DEFECT_FIX', 'SCRAP_FROM_RECHECK', 'REQUEST_STATUS_CHANGE')),
    state TEXT NOT NULL DEFAULT 'PENDING' CHECK (state IN ('PENDING', 'APPROVED', 'REJECTED')),
    submitted_by INTEGER NOT NULL,
    submitted_at_us INTEGER NOT NULL,
    submit_note TEXT,
    reviewed_by INTEGER,
    reviewed_at_us INTEGER,
    review_note TEXT,
    reject_reason TEXT,
    updated_at_us INTEGER NOT NULL,
    deleted_at_us INTEGER
);

CREATE TABLE IF NOT EXISTS item_images (
    image_id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER REFERENCES items(item_id) ON DELETE CASCADE,
    review_id INTEGER REFERENCES reviews(review_id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK (kind IN ('DETECTED', 'FIX', 'OTHER')),
    path TEXT NOT NULL CHECK (length(trim(path)) > 0),
    uploaded_by INTEGER,
    uploaded_at_us INTEGER NOT NULL,
    meta_json TEXT,
    deleted_at_us INTEGER
);

CREATE TABLE IF NOT EXISTS item_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES items(item_id) ON DELETE CASCADE,
    actor_id INTEGER,
    event_type TEXT NOT NULL CHECK (length(trim(event_type)) > 0),
    from_status_id INTEGER REFERENCES item_statuses(status_id),
    to_status_id INTEGER REFERENCES item_statuses(status_id),
    details_json TEXT,
    created_at_us INTEGER NOT NULL,
    deleted_at_us INTEGER
);

CREATE TRIGGER IF NOT EXISTS item_events_append_only
BEFORE UPDATE OF item_id, actor_id, event_type, from_status_id, to_status_id,
    details_json, created_at_us ON item_events
BEGIN
    SELECT RAISE(ABORT, 'item_events is append-only');
END;

CREATE TRIGGER IF NOT EXISTS item_events_no_delete
BEFORE DELETE ON item_events
BEGIN
    SELECT RAISE(ABORT, 'item_events is append-only');
END;

CREATE TRIGGER IF NOT EXISTS items_soft_delete_only
BEFORE DELETE ON items
BEGIN
    SELECT RAISE(ABORT, 'items are soft-deleted only');
END;

CREATE TABLE IF NOT EXISTS schema_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    seeded_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO schema_meta (id, schema_version, seeded_at_us) VALUES (1, 1, 0);
";

/// Migration v2: status-change requests and the one-pending-per-item indexes.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS status_change_requests (
    request_id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES items(item_id) ON DELETE CASCADE,
    from_status_id INTEGER NOT NULL REFERENCES item_statuses(status_id),
    to_status_id INTEGER NOT NULL REFERENCES item_statuses(status_id),
    state TEXT NOT NULL DEFAULT 'PENDING' CHECK (state IN ('PENDING', 'APPROVED', 'REJECTED')),
    requested_by INTEGER NOT NULL,
    requested_at_us INTEGER NOT NULL,
    approved_by INTEGER,
    approved_at_us INTEGER,
    reason TEXT,
    meta_json TEXT,
    deleted_at_us INTEGER
);

CREATE TABLE IF NOT EXISTS status_change_request_defects (
    request_id INTEGER NOT NULL REFERENCES status_change_requests(request_id) ON DELETE CASCADE,
    defect_type_id INTEGER NOT NULL REFERENCES defect_types(defect_type_id),
    PRIMARY KEY (request_id, defect_type_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_requests_one_pending_per_item
    ON status_change_requests(item_id)
    WHERE state = 'PENDING' AND deleted_at_us IS NULL;

CREATE UNIQUE INDEX IF NOT EXISTS uq_reviews_one_pending_per_item
    ON reviews(item_id)
    WHERE state = 'PENDING' AND deleted_at_us IS NULL;
";

/// Migration v3: read-path indexes for listings and history.
pub const MIGRATION_V3_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_items_status_detected
    ON items(status_id, detected_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_items_line_detected
    ON items(line_id, detected_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_item_defects_type
    ON item_defects(defect_type_id, item_id);

CREATE INDEX IF NOT EXISTS idx_item_events_item_created
    ON item_events(item_id, created_at_us DESC, event_id DESC);

CREATE INDEX IF NOT EXISTS idx_requests_state_requested
    ON status_change_requests(state, requested_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_request_defects_type
    ON status_change_request_defects(defect_type_id);

CREATE INDEX IF NOT EXISTS idx_reviews_item_updated
    ON reviews(item_id, updated_at_us DESC, review_id DESC);

CREATE INDEX IF NOT EXISTS idx_item_images_item_kind
    ON item_images(item_id, kind);

CREATE INDEX IF NOT EXISTS idx_item_images_review
    ON item_images(review_id);
";

/// Migration v4: reference catalogs.
pub const MIGRATION_V4_SQL: &str = r"
INSERT OR IGNORE INTO item_statuses (code, name, display_order) VALUES
    ('DEFECT', 'Defect', 10),
    ('REJECTED', 'Rejected', 20),
    ('SCRAP', 'Scrap', 30),
    ('LEFTOVER_ROLL', 'Leftover roll', 30),
    ('RECHECK', 'Recheck', 40),
    ('NORMAL', 'Normal', 50),
    ('QC_PASSED', 'QC Passed', 60);

INSERT OR IGNORE INTO defect_types (code, name, display_order) VALUES
    ('LABEL', 'Label', 10),
    ('BARCODE', 'Barcode', 20),
    ('TOP', 'Top surface', 30),
    ('BOTTOM', 'Bottom surface', 40),
    ('SCRATCH', 'Scratch', 50);
";

/// Indexes expected by the write and read paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "uq_requests_one_pending_per_item",
    "uq_reviews_one_pending_per_item",
    "idx_items_status_detected",
    "idx_items_line_detected",
    "idx_item_defects_type",
    "idx_item_events_item_created",
    "idx_requests_state_requested",
    "idx_request_defects_type",
    "idx_reviews_item_updated",
    "idx_item_images_item_kind",
    "idx_item_images_review",
];
