//! Spatial lookup of cataloged tiles.

use tracing::{debug, info};

use crate::db::{Database, Tile};
use crate::error::Result;
use crate::spatial::{reconcile_crs, Bounds, Crs, Reprojector};

/// Finds tiles whose footprint touches a query rectangle. Footprints are
/// kept in `working_crs`, so queries are reprojected there first.
pub struct OverlapResolver<'a> {
    reprojector: &'a dyn Reprojector,
    working_crs: &'a Crs,
}

impl<'a> OverlapResolver<'a> {
    pub fn new(reprojector: &'a dyn Reprojector, working_crs: &'a Crs) -> Self {
        Self {
            reprojector,
            working_crs,
        }
    }

    /// Tiles overlapping `query` (in `query_crs`). Touching edges count.
    pub fn find(&self, db: &Database, query: &Bounds, query_crs: &Crs) -> Result<Vec<Tile>> {
        let normalized = reconcile_crs(query, query_crs, self.working_crs, self.reprojector)?;
        debug!(?normalized, crs = %self.working_crs, "overlap query");

        let tiles = db.tiles_intersecting(&normalized)?;
        if tiles.is_empty() {
            info!(?query, crs = %query_crs, "no cataloged tile overlaps the query");
        }
        Ok(tiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TileRecord;
    use crate::spatial::{Affine, Proj4Reprojector};

    fn catalog_tile(db: &Database, path: &str, footprint: Bounds) -> i64 {
        db.insert(&TileRecord::build(
            path,
            1,
            None,
            footprint,
            (10, 10),
            Affine::from_bounds(&footprint, 10, 10),
            Crs::WGS84,
            Some(footprint),
        ))
        .unwrap()
    }

    #[test]
    fn test_closed_interval_overlap() {
        let db = Database::open_in_memory().unwrap();
        let id = catalog_tile(&db, "/t/a.npy", Bounds::new(0.0, 0.0, 10.0, 10.0));
        let reprojector = Proj4Reprojector::new();
        let resolver = OverlapResolver::new(&reprojector, &Crs::WGS84);

        let touching = resolver.find(&db, &Bounds::new(10.0, 10.0, 20.0, 20.0), &Crs::WGS84).unwrap();
        assert_eq!(touching.iter().map(|t| t.id).collect::<Vec<_>>(), vec![id]);

        let apart = resolver
            .find(&db, &Bounds::new(10.0001, 10.0001, 20.0, 20.0), &Crs::WGS84)
            .unwrap();
        assert!(apart.is_empty());
    }

    #[test]
    fn test_query_in_other_crs_is_normalized() {
        let db = Database::open_in_memory().unwrap();
        let id = catalog_tile(&db, "/t/a.npy", Bounds::new(14.9, 44.9, 15.1, 45.1));
        catalog_tile(&db, "/t/b.npy", Bounds::new(-10.0, -10.0, -9.0, -9.0));
        let reprojector = Proj4Reprojector::new();
        let resolver = OverlapResolver::new(&reprojector, &Crs::WGS84);

        // Central meridian of UTM 33N, around 45°N.
        let query = Bounds::new(499_000.0, 4_982_000.0, 501_000.0, 4_984_000.0);
        let found = resolver.find(&db, &query, &Crs::Epsg(32633)).unwrap();
        assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![id]);
    }

    #[test]
    fn test_tiles_without_footprint_are_never_found() {
        let db = Database::open_in_memory().unwrap();
        let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0);
        db.insert(&TileRecord::build(
            "/t/c.npy",
            1,
            None,
            bounds,
            (1, 1),
            Affine::from_bounds(&bounds, 1, 1),
            Crs::Wkt("LOCAL_CS[\"site\"]".into()),
            None,
        ))
        .unwrap();
        let reprojector = Proj4Reprojector::new();
        let resolver = OverlapResolver::new(&reprojector, &Crs::WGS84);
        assert!(resolver.find(&db, &bounds, &Crs::WGS84).unwrap().is_empty());
    }
}
