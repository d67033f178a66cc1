//! Benchmark for history packing and time-travel queries on synthetic data.
//!
//! Generates a neighbourhood of buildings and points of interest that are
//! edited over twelve years, packs it into grid cells and runs snapshot and
//! contribution aggregations against it.
//!
//! Usage: `bench-history [config.json]`. Set `RUST_LOG=debug` for packing
//! details.

use std::fs;
use std::time::Instant;

use log::info;
use serde::Deserialize;

use osmhist::model::builder::{node, relation, way};
use osmhist::tags::{default_area_rules, default_uninteresting_keys};
use osmhist::{
    Activity, EntityHistory, MapReducer, MemoryCellSource, NodeHistory, OsmType, QueryConfig, RelationHistory, Tag,
    TagInterpreter, Vocabulary, WayHistory, format_timestamp,
};

const DEFAULT_CONFIG: &str = r#"{
    "blocks": 20000,
    "edits_per_entity": 4,
    "seed": 7,
    "query": {
        "bbox": [8.60, 49.35, 8.80, 49.45],
        "timestamps": { "start": "2008-01-01", "end": "2020-01-01", "period": "P1Y" },
        "include_old_style_multipolygons": true
    }
}"#;

fn default_blocks() -> usize {
    20_000
}

fn default_edits() -> u32 {
    4
}

fn default_level() -> i32 {
    3
}

fn default_pack_zoom() -> u8 {
    12
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BenchConfig {
    /// Buildings to generate; every block also gets one point of interest.
    #[serde(default = "default_blocks")]
    blocks: usize,
    #[serde(default = "default_edits")]
    edits_per_entity: u32,
    #[serde(default)]
    seed: u64,
    #[serde(default = "default_level")]
    compression_level: i32,
    #[serde(default = "default_pack_zoom")]
    pack_zoom: u8,
    query: QueryConfig,
}

// =============================================================================
// SYNTHETIC HISTORY
// =============================================================================

/// splitmix64, enough for reproducible test data.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n.max(1)
    }

    fn unit(&mut self) -> f64 {
        (self.next() >> 11) as f64 / (1u64 << 53) as f64
    }
}

struct Tags {
    building_yes: Tag,
    building_house: Tag,
    levels_two: Tag,
    drinking_water: Tag,
    bench: Tag,
    multipolygon: Tag,
    outer: u32,
}

impl Tags {
    fn intern(vocab: &mut Vocabulary) -> Self {
        Tags {
            building_yes: vocab.intern_tag("building", "yes"),
            building_house: vocab.intern_tag("building", "house"),
            levels_two: vocab.intern_tag("building:levels", "2"),
            drinking_water: vocab.intern_tag("amenity", "drinking_water"),
            bench: vocab.intern_tag("amenity", "bench"),
            multipolygon: vocab.intern_tag("type", "multipolygon"),
            outer: vocab.intern_role("outer"),
        }
    }
}

const START: i64 = 1_199_145_600_000; // 2008-01-01
const SPAN: i64 = 12 * 365 * 24 * 3_600_000;

/// Edit times for one entity, ascending and distinct.
fn edit_times(rng: &mut Rng, edits: u32) -> Vec<i64> {
    let mut times: Vec<i64> = (0..edits.max(1))
        .map(|_| START + rng.below(SPAN as u64) as i64)
        .collect();
    times.sort_unstable();
    times.dedup();
    times
}

fn corner_history(rng: &mut Rng, id: i64, lon: f64, lat: f64, edits: u32, changeset: &mut i64) -> NodeHistory {
    let versions = edit_times(rng, edits)
        .into_iter()
        .enumerate()
        .map(|(i, t)| {
            *changeset += 1;
            let jitter = if i == 0 { 0.0 } else { (rng.unit() - 0.5) * 1e-5 };
            node(id, i as u32 + 1, t)
                .at_degrees(lon + jitter, lat + jitter)
                .changeset(*changeset)
                .build()
        })
        .collect();
    NodeHistory::new(versions).expect("valid node history")
}

fn generate(config: &BenchConfig, tags: &Tags) -> Vec<EntityHistory> {
    let mut rng = Rng(config.seed);
    let mut changeset = 0i64;
    let mut out = Vec::with_capacity(config.blocks * 7);
    let side = (config.blocks as f64).sqrt().ceil() as usize;
    let size = 0.0004;

    for block in 0..config.blocks {
        let lon = 8.60 + (block % side) as f64 * 0.2 / side as f64;
        let lat = 49.35 + (block / side) as f64 * 0.1 / side as f64;
        let first_node = block as i64 * 5 + 1;

        let corners: Vec<NodeHistory> = [(0.0, 0.0), (size, 0.0), (size, size), (0.0, size)]
            .iter()
            .enumerate()
            .map(|(i, &(dx, dy))| {
                corner_history(&mut rng, first_node + i as i64, lon + dx, lat + dy, config.edits_per_entity, &mut changeset)
            })
            .collect();
        let created = corners
            .iter()
            .map(|n| n.versions()[0].meta.timestamp)
            .max()
            .unwrap_or(START);

        let way_id = block as i64 + 1;
        let refs = [first_node, first_node + 1, first_node + 2, first_node + 3, first_node];
        let mut versions = vec![
            way(way_id, 1, created)
                .refs(refs)
                .tag(tags.building_yes.key, tags.building_yes.value)
                .changeset(changeset)
                .build(),
        ];
        if rng.below(2) == 0 {
            let t = created + 1 + rng.below((START + SPAN - created).max(1) as u64) as i64;
            versions.push(
                way(way_id, 2, t)
                    .refs(refs)
                    .tag(tags.building_house.key, tags.building_house.value)
                    .tag(tags.levels_two.key, tags.levels_two.value)
                    .changeset(changeset + 1)
                    .build(),
            );
        }
        if rng.below(10) == 0 {
            let t = START + SPAN + 1 + rng.below(SPAN as u64 / 12) as i64;
            versions.push(way(way_id, versions.len() as u32 + 1, t).deleted().build());
        }
        let way_history = WayHistory::new(versions, corners.clone()).expect("valid way history");

        // old-style: the building tag stays on the outer way
        if block % 50 == 0 {
            let rel = relation(way_id, 1, created + 1)
                .tag(tags.multipolygon.key, tags.multipolygon.value)
                .way_member(way_id, tags.outer)
                .build();
            let rel_history =
                RelationHistory::new(vec![rel], corners.clone(), [way_history.clone()]).expect("valid relation history");
            out.push(EntityHistory::Relation(rel_history));
        }

        let poi_id = first_node + 4;
        let poi_versions = edit_times(&mut rng, config.edits_per_entity)
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                let tag = if i % 2 == 0 { tags.drinking_water } else { tags.bench };
                node(poi_id, i as u32 + 1, t)
                    .at_degrees(lon + size * 2.0, lat + size / 2.0)
                    .tag(tag.key, tag.value)
                    .build()
            })
            .collect();
        out.push(EntityHistory::Node(NodeHistory::new(poi_versions).expect("valid node history")));

        out.extend(corners.into_iter().map(EntityHistory::Node));
        out.push(EntityHistory::Way(way_history));
    }
    out
}

fn main() {
    env_logger::init();

    let config_json = match std::env::args().nth(1) {
        Some(path) => {
            println!("Loading config from: {}", path);
            fs::read_to_string(&path).expect("Failed to read config file")
        }
        None => DEFAULT_CONFIG.to_string(),
    };
    let config: BenchConfig = serde_json::from_str(&config_json).expect("Failed to parse config");
    let timestamps = config.query.time_axis().expect("Invalid time axis");
    println!(
        "Querying {} timestamps from {} to {}",
        timestamps.len(),
        format_timestamp(timestamps[0]),
        format_timestamp(timestamps[timestamps.len() - 1])
    );

    let mut vocab = Vocabulary::new();
    let tags = Tags::intern(&mut vocab);
    let rules = default_area_rules().expect("bundled area rules");
    let uninteresting = default_uninteresting_keys().expect("bundled tag keys");
    let interpreter = TagInterpreter::new(&rules, &uninteresting, &vocab);

    // Generate
    let generate_start = Instant::now();
    let histories = generate(&config, &tags);
    let generate_time = generate_start.elapsed();
    let versions: usize = histories.iter().map(|h| h.metas().len()).sum();
    println!(
        "Generated {} entities with {} versions in {:?}",
        histories.len(),
        versions,
        generate_time
    );

    // Pack (uncompressed)
    let pack_start = Instant::now();
    let plain = MemoryCellSource::pack(histories.clone(), config.pack_zoom, None).expect("Failed to pack");
    let pack_time = pack_start.elapsed();
    println!(
        "\nUncompressed: {} cells, {} bytes in {:?}",
        plain.len(),
        plain.total_bytes(),
        pack_time
    );
    println!(
        "  {:.1} bytes/version",
        plain.total_bytes() as f64 / versions as f64
    );

    // Pack (compressed)
    let compress_start = Instant::now();
    let compressed = MemoryCellSource::pack(histories, config.pack_zoom, Some(config.compression_level))
        .expect("Failed to pack compressed");
    let compress_time = compress_start.elapsed();
    println!(
        "\nCompressed (level {}): {} bytes in {:?}",
        config.compression_level,
        compressed.total_bytes(),
        compress_time
    );
    println!(
        "  Compression ratio: {:.1}x",
        plain.total_bytes() as f64 / compressed.total_bytes() as f64
    );

    for (label, source) in [("uncompressed", &plain), ("compressed", &compressed)] {
        let reducer = MapReducer::from_config(source, &config.query, &interpreter)
            .expect("Invalid query")
            .max_zoom(config.pack_zoom);
        info!("{} query visits {} cell/type pairs", label, reducer.cells().len());

        // Snapshots: building count and footprint per timestamp
        let snapshot_start = Instant::now();
        let areas = reducer.aggregate_snapshots_by_timestamp(
            || (0u64, 0.0f64),
            |(n, area), e| match e.kind() {
                OsmType::Way => (n + 1, area + e.area()),
                _ => (n, area + e.area()),
            },
            |a, b| (a.0 + b.0, a.1 + b.1),
        );
        let snapshot_time = snapshot_start.elapsed();

        println!("\n=== Snapshots ({}) in {:?} ===", label, snapshot_time);
        for (t, (buildings, area)) in &areas.result {
            println!(
                "{}  {:>7} buildings  {:>12.0} m²",
                format_timestamp(*t),
                buildings,
                area
            );
        }
        println!("{:?}", areas.diagnostics);

        // Contributions: edits per year, split by activity
        let contribution_start = Instant::now();
        let edits = reducer.aggregate_contributions_by_timestamp(
            || [0u64; 5],
            |mut counts, e| {
                for (slot, activity) in Activity::ALL.iter().enumerate() {
                    if e.activities.contains(*activity) {
                        counts[slot] += 1;
                    }
                }
                counts
            },
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                a
            },
        );
        let contribution_time = contribution_start.elapsed();

        println!("\n=== Contributions ({}) in {:?} ===", label, contribution_time);
        let names: Vec<&str> = Activity::ALL.iter().map(|a| a.name()).collect();
        println!("{:<24}  {}", "interval start", names.join(" / "));
        for (t, counts) in &edits.result {
            let counts: Vec<String> = counts.iter().map(u64::to_string).collect();
            println!("{:<24}  {}", format_timestamp(*t), counts.join(" / "));
        }
        println!("{:?}", edits.diagnostics);
    }

    // Summary
    println!("\n=== Summary ===");
    println!("History start: {}", format_timestamp(START));
    println!(
        "Packed size: {} bytes ({:.1} MB) uncompressed, {} bytes ({:.1} MB) compressed",
        plain.total_bytes(),
        plain.total_bytes() as f64 / 1_000_000.0,
        compressed.total_bytes(),
        compressed.total_bytes() as f64 / 1_000_000.0
    );
}
