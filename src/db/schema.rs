pub const SCHEMA: &str = r#"
-- Satellites: sensor catalog, seeded once
CREATE TABLE IF NOT EXISTS satellite (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    resolution INTEGER NOT NULL,  -- cm per pixel
    type TEXT NOT NULL CHECK (type IN ('optic', 'radar'))
);

-- Timeseries: date range spanned by the linked tiles
CREATE TABLE IF NOT EXISTS timeseries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    CHECK (start_date <= end_date)
);

-- Tiles: one stored array file per row
CREATE TABLE IF NOT EXISTS tile (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    satellite_id INTEGER NOT NULL,
    date_origin TEXT,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,

    -- Native bounds, in the tile's own CRS
    min_x REAL NOT NULL,
    min_y REAL NOT NULL,
    max_x REAL NOT NULL,
    max_y REAL NOT NULL,
    pixel_size_x REAL NOT NULL,
    pixel_size_y REAL NOT NULL,
    transform TEXT NOT NULL,  -- JSON [a, b, c, d, e, f]

    -- Either an EPSG code here or a tile_crs row, never both
    epsg INTEGER,

    -- Bounds in the working CRS; NULL when the CRS could not be reprojected
    footprint_min_x REAL,
    footprint_min_y REAL,
    footprint_max_x REAL,
    footprint_max_y REAL,

    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (satellite_id) REFERENCES satellite(id)
);

CREATE INDEX IF NOT EXISTS idx_tile_satellite ON tile(satellite_id);
CREATE INDEX IF NOT EXISTS idx_tile_footprint ON tile(footprint_min_x, footprint_max_x);

-- CRS text for tiles without an EPSG code
CREATE TABLE IF NOT EXISTS tile_crs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tile_id INTEGER NOT NULL UNIQUE,
    crs TEXT NOT NULL,
    FOREIGN KEY (tile_id) REFERENCES tile(id) ON DELETE CASCADE
);

CREATE TRIGGER IF NOT EXISTS tile_crs_exclusive
BEFORE INSERT ON tile_crs
WHEN (SELECT epsg FROM tile WHERE id = NEW.tile_id) IS NOT NULL
BEGIN
    SELECT RAISE(ABORT, 'tile already has an EPSG code');
END;

-- Timeseries membership, ordered by position (ascending date)
CREATE TABLE IF NOT EXISTS timeseries_tile_link (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timeseries_id INTEGER NOT NULL,
    tile_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    UNIQUE (timeseries_id, position),
    FOREIGN KEY (timeseries_id) REFERENCES timeseries(id) ON DELETE CASCADE,
    FOREIGN KEY (tile_id) REFERENCES tile(id)
);

CREATE INDEX IF NOT EXISTS idx_link_tile ON timeseries_tile_link(tile_id);

-- Masks: label rasters aligned with a parent tile
CREATE TABLE IF NOT EXISTS mask (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    tile_id INTEGER NOT NULL,
    timeseries_id INTEGER,
    task TEXT NOT NULL CHECK (task IN ('ntp', 'field_delineation', 'perm_structures')),
    mask_type TEXT NOT NULL,
    date_origin TEXT,
    min_x REAL NOT NULL,
    min_y REAL NOT NULL,
    max_x REAL NOT NULL,
    max_y REAL NOT NULL,
    transform TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (tile_id) REFERENCES tile(id),
    FOREIGN KEY (timeseries_id) REFERENCES timeseries(id)
);

CREATE INDEX IF NOT EXISTS idx_mask_tile ON mask(tile_id);

-- Multimodal: a high-resolution tile paired with a timeseries
CREATE TABLE IF NOT EXISTS multimodal (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tile_id INTEGER NOT NULL,
    timeseries_id INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (tile_id) REFERENCES tile(id),
    FOREIGN KEY (timeseries_id) REFERENCES timeseries(id)
);
"#;

/// Sensors present in every new catalog: (name, cm per pixel, type).
pub const SEED_SATELLITES: &[(&str, i64, &str)] = &[
    ("Sentinel-2", 100, "optic"),
    ("Sentinel-1", 100, "radar"),
    ("Pleiades-50", 50, "optic"),
    ("PleiadesNEO", 30, "optic"),
    ("ortophoto25", 25, "optic"),
];
