use crate::debug_println;
use crate::models::ParcelRecord;
use anyhow::{Context, Result};
use rand::Rng;
use reqwest::blocking::Client;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// Tile edge in degrees. Small enough that Overpass answers each tile
/// quickly, large enough that a neighborhood polygon needs few tiles.
const TILE_DEG: f64 = 0.012;

/// Discover street addresses inside a drawn polygon from OpenStreetMap.
/// The polygon's bounding box is cut into tiles, each tile queried for
/// addressed nodes and ways, and the results filtered back to the exact
/// polygon. Only addresses come out of OSM; contact fields stay empty.
pub fn fetch_parcels_in_polygon(
    latlngs: &[(f64, f64)],
    limit: usize,
) -> Result<Vec<ParcelRecord>> {
    if latlngs.len() < 3 {
        anyhow::bail!("Polygon needs at least 3 points, got {}", latlngs.len());
    }

    let client = Client::builder()
        .user_agent("roofscan/0.1")
        .timeout(Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")?;

    let tiles = tile_bbox(latlngs);
    debug_println!("Polygon bbox split into {} tiles", tiles.len());

    let mut seen: HashSet<String> = HashSet::new();
    let mut parcels = Vec::new();
    let mut rng = rand::thread_rng();

    for (i, (south, west, north, east)) in tiles.iter().enumerate() {
        if parcels.len() >= limit {
            break;
        }

        let query = format!(
            "[out:json][timeout:25];\
             (node[\"addr:housenumber\"][\"addr:street\"]({s},{w},{n},{e});\
              way[\"addr:housenumber\"][\"addr:street\"]({s},{w},{n},{e}););\
             out center;",
            s = south,
            w = west,
            n = north,
            e = east
        );

        let response = client
            .post(OVERPASS_URL)
            .form(&[("data", query.as_str())])
            .send()
            .context("Overpass request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("Overpass returned HTTP {}", response.status());
        }
        let body: serde_json::Value =
            response.json().context("Overpass returned invalid JSON")?;

        for element in body["elements"].as_array().cloned().unwrap_or_default() {
            if parcels.len() >= limit {
                break;
            }
            let Some((lat, lng)) = pick_latlng(&element) else {
                continue;
            };
            if !point_in_poly(lat, lng, latlngs) {
                continue;
            }
            let address = format_osm_address(&element["tags"]);
            if address.is_empty() {
                continue;
            }
            if !seen.insert(address.to_lowercase()) {
                continue;
            }
            parcels.push(ParcelRecord {
                address,
                ..ParcelRecord::default()
            });
        }

        // Overpass rate-limits aggressively; pause between tiles.
        if i + 1 < tiles.len() {
            thread::sleep(Duration::from_millis(700 + rng.gen_range(0..400)));
        }
    }

    debug_println!("Found {} unique addresses in polygon", parcels.len());
    Ok(parcels)
}

/// Cut the polygon's bounding box into TILE_DEG squares, returned as
/// (south, west, north, east).
fn tile_bbox(latlngs: &[(f64, f64)]) -> Vec<(f64, f64, f64, f64)> {
    let mut south = f64::MAX;
    let mut north = f64::MIN;
    let mut west = f64::MAX;
    let mut east = f64::MIN;
    for &(lat, lng) in latlngs {
        south = south.min(lat);
        north = north.max(lat);
        west = west.min(lng);
        east = east.max(lng);
    }

    let mut tiles = Vec::new();
    let mut lat = south;
    while lat < north {
        let lat_top = (lat + TILE_DEG).min(north);
        let mut lng = west;
        while lng < east {
            let lng_right = (lng + TILE_DEG).min(east);
            tiles.push((lat, lng, lat_top, lng_right));
            lng += TILE_DEG;
        }
        lat += TILE_DEG;
    }
    tiles
}

/// Nodes carry lat/lon directly; ways come back with a computed center.
fn pick_latlng(element: &serde_json::Value) -> Option<(f64, f64)> {
    if let (Some(lat), Some(lon)) = (element["lat"].as_f64(), element["lon"].as_f64()) {
        return Some((lat, lon));
    }
    let center = &element["center"];
    match (center["lat"].as_f64(), center["lon"].as_f64()) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => None,
    }
}

/// "123 MAIN ST" from OSM address tags. Unit tags are appended when
/// present so distinct units stay distinct through deduplication.
fn format_osm_address(tags: &serde_json::Value) -> String {
    let number = tags["addr:housenumber"].as_str().unwrap_or("").trim();
    let street = tags["addr:street"].as_str().unwrap_or("").trim();
    if number.is_empty() || street.is_empty() {
        return String::new();
    }
    let mut address = format!("{} {}", number, street).to_uppercase();
    if let Some(unit) = tags["addr:unit"].as_str() {
        let unit = unit.trim();
        if !unit.is_empty() {
            address.push_str(&format!(" UNIT {}", unit.to_uppercase()));
        }
    }
    address
}

/// Ray-cast point-in-polygon over (lat, lng) vertices. Edges count as
/// inside often enough for parcel filtering; exactness is not needed at
/// address scale.
fn point_in_poly(lat: f64, lng: f64, poly: &[(f64, f64)]) -> bool {
    let mut inside = false;
    let n = poly.len();
    let mut j = n - 1;
    for i in 0..n {
        let (yi, xi) = poly[i];
        let (yj, xj) = poly[j];
        if ((yi > lat) != (yj > lat))
            && (lng < (xj - xi) * (lat - yi) / (yj - yi) + xi)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn point_in_poly_square() {
        let square = [(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)];
        assert!(point_in_poly(5.0, 5.0, &square));
        assert!(!point_in_poly(15.0, 5.0, &square));
        assert!(!point_in_poly(-1.0, -1.0, &square));
    }

    #[test]
    fn point_in_poly_concave() {
        // L-shape; the notch at the top right is outside.
        let poly = [
            (0.0, 0.0),
            (0.0, 10.0),
            (5.0, 10.0),
            (5.0, 5.0),
            (10.0, 5.0),
            (10.0, 0.0),
        ];
        assert!(point_in_poly(2.0, 8.0, &poly));
        assert!(!point_in_poly(8.0, 8.0, &poly));
    }

    #[test]
    fn tiny_bbox_is_one_tile() {
        let poly = [(26.60, -81.95), (26.60, -81.94), (26.61, -81.94)];
        let tiles = tile_bbox(&poly);
        assert_eq!(tiles.len(), 1);
        let (s, w, n, e) = tiles[0];
        assert!(s <= 26.60 && n >= 26.61 - 1e-9);
        assert!(w <= -81.95 && e >= -81.94 - 1e-9);
    }

    #[test]
    fn wide_bbox_gets_multiple_tiles() {
        let poly = [(26.60, -81.98), (26.60, -81.93), (26.63, -81.93)];
        assert!(tile_bbox(&poly).len() > 1);
    }

    #[test]
    fn formats_osm_address_tags() {
        let tags = json!({"addr:housenumber": "4117", "addr:street": "Se 20th Pl"});
        assert_eq!(format_osm_address(&tags), "4117 SE 20TH PL");

        let with_unit = json!({
            "addr:housenumber": "12", "addr:street": "Palm Ave", "addr:unit": "b"
        });
        assert_eq!(format_osm_address(&with_unit), "12 PALM AVE UNIT B");

        assert_eq!(format_osm_address(&json!({"addr:street": "Palm Ave"})), "");
    }

    #[test]
    fn way_elements_use_center_coordinates() {
        let node = json!({"lat": 26.6, "lon": -81.9});
        assert_eq!(pick_latlng(&node), Some((26.6, -81.9)));

        let way = json!({"center": {"lat": 26.7, "lon": -81.8}});
        assert_eq!(pick_latlng(&way), Some((26.7, -81.8)));

        assert_eq!(pick_latlng(&json!({"tags": {}})), None);
    }
}
