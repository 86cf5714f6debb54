// Static schedule reference: trip_id -> headsign and trip_id -> terminus name.
//
// Built from the agency's static GTFS archive (stops.txt, trips.txt,
// stop_times.txt), persisted as JSON with a build stamp and reused across
// restarts until the stamp is older than the TTL.

use crate::error::{BoardError, Result};
use crate::http::create_http_client;
use bytes::Bytes;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use zip::ZipArchive;

pub const CACHE_FILE_NAME: &str = "schedule_cache.json";
const SECONDS_PER_DAY: u64 = 86400;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ============================================================================
// Persisted reference table
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleReference {
    pub headsigns: HashMap<String, String>, // key: trip_id
    pub termini: HashMap<String, String>,   // key: trip_id, value: last stop's name
    pub cached_at: u64,
}

impl ScheduleReference {
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.cached_at)
    }

    pub fn is_expired(&self, ttl_days: u64, now: u64) -> bool {
        self.age_secs(now) >= ttl_days * SECONDS_PER_DAY
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BoardError::FileError(format!("Failed to create cache dir: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BoardError::FileError(format!("Failed to serialize cache: {}", e)))?;

        fs::write(path, json)
            .map_err(|e| BoardError::FileError(format!("Failed to write cache: {}", e)))?;

        info!("Schedule cache saved to {:?}", path);
        Ok(())
    }

    /// Returns the persisted table if present, readable and younger than the TTL.
    pub fn load(path: &Path, ttl_days: u64) -> Option<Self> {
        if !path.exists() {
            info!("No schedule cache at {:?}, will download fresh data", path);
            return None;
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read schedule cache file ({}), will refresh", e);
                return None;
            }
        };

        match serde_json::from_str::<ScheduleReference>(&contents) {
            Ok(reference) => {
                let now = now_secs();
                if reference.is_expired(ttl_days, now) {
                    info!("Schedule cache expired (>= {} days old), refreshing", ttl_days);
                    None
                } else {
                    info!(
                        "Schedule cache loaded ({} days old): {} headsigns, {} termini",
                        reference.age_secs(now) / SECONDS_PER_DAY,
                        reference.headsigns.len(),
                        reference.termini.len()
                    );
                    Some(reference)
                }
            }
            Err(e) => {
                warn!("Failed to parse schedule cache ({}), will refresh", e);
                None
            }
        }
    }

    /// Parses a static GTFS archive.
    ///
    /// The terminus of a trip is the stop with the highest `stop_sequence`
    /// for that trip, so rows need not be grouped or ordered by trip. Ties
    /// keep the later row.
    pub fn from_archive(zip_bytes: Bytes, cached_at: u64) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(zip_bytes))
            .map_err(|e| BoardError::ArchiveError(format!("Failed to open GTFS zip: {}", e)))?;

        let stop_names = Self::parse_stop_names(&mut archive)?;
        let headsigns = Self::parse_headsigns(&mut archive)?;
        let last_stops = Self::parse_last_stops(&mut archive)?;

        let termini = last_stops
            .into_iter()
            .filter_map(|(trip_id, (_, stop_id))| {
                stop_names.get(&stop_id).map(|name| (trip_id, name.clone()))
            })
            .collect();

        Ok(ScheduleReference {
            headsigns,
            termini,
            cached_at,
        })
    }

    fn parse_stop_names<R: Read + std::io::Seek>(
        archive: &mut ZipArchive<R>,
    ) -> Result<HashMap<String, String>> {
        let mut rdr = open_table(archive, "stops.txt")?;
        let headers = rdr
            .headers()
            .map_err(|e| BoardError::ArchiveError(format!("stops.txt: {}", e)))?
            .clone();
        let id_col = column(&headers, "stops.txt", "stop_id")?;
        let name_col = column(&headers, "stops.txt", "stop_name")?;

        let mut names = HashMap::new();
        for record in rdr.records().flatten() {
            if let (Some(stop_id), Some(stop_name)) = (record.get(id_col), record.get(name_col)) {
                names.insert(stop_id.to_string(), stop_name.to_string());
            }
        }
        Ok(names)
    }

    fn parse_headsigns<R: Read + std::io::Seek>(
        archive: &mut ZipArchive<R>,
    ) -> Result<HashMap<String, String>> {
        let mut rdr = open_table(archive, "trips.txt")?;
        let headers = rdr
            .headers()
            .map_err(|e| BoardError::ArchiveError(format!("trips.txt: {}", e)))?
            .clone();
        let trip_col = column(&headers, "trips.txt", "trip_id")?;
        let headsign_col = column(&headers, "trips.txt", "trip_headsign")?;

        let mut headsigns = HashMap::new();
        for record in rdr.records().flatten() {
            if let (Some(trip_id), Some(headsign)) = (record.get(trip_col), record.get(headsign_col)) {
                if !headsign.is_empty() {
                    headsigns.insert(trip_id.to_string(), headsign.to_string());
                }
            }
        }
        Ok(headsigns)
    }

    /// trip_id -> (stop_sequence, stop_id) of the last stop visited.
    fn parse_last_stops<R: Read + std::io::Seek>(
        archive: &mut ZipArchive<R>,
    ) -> Result<HashMap<String, (u32, String)>> {
        let mut rdr = open_table(archive, "stop_times.txt")?;
        let headers = rdr
            .headers()
            .map_err(|e| BoardError::ArchiveError(format!("stop_times.txt: {}", e)))?
            .clone();
        let trip_col = column(&headers, "stop_times.txt", "trip_id")?;
        let stop_col = column(&headers, "stop_times.txt", "stop_id")?;
        let seq_col = column(&headers, "stop_times.txt", "stop_sequence")?;

        let mut last_stops: HashMap<String, (u32, String)> = HashMap::new();
        for record in rdr.records().flatten() {
            let (Some(trip_id), Some(stop_id), Some(seq)) =
                (record.get(trip_col), record.get(stop_col), record.get(seq_col))
            else {
                continue;
            };
            let Ok(sequence) = seq.trim().parse::<u32>() else {
                continue;
            };

            match last_stops.get_mut(trip_id) {
                Some(last) if sequence >= last.0 => *last = (sequence, stop_id.to_string()),
                Some(_) => {}
                None => {
                    last_stops.insert(trip_id.to_string(), (sequence, stop_id.to_string()));
                }
            }
        }
        Ok(last_stops)
    }
}

fn open_table<'a, R: Read + std::io::Seek>(
    archive: &'a mut ZipArchive<R>,
    name: &str,
) -> Result<csv::Reader<zip::read::ZipFile<'a>>> {
    let file = archive
        .by_name(name)
        .map_err(|e| BoardError::ArchiveError(format!("{} not found: {}", name, e)))?;
    Ok(csv::ReaderBuilder::new().flexible(true).from_reader(file))
}

fn column(headers: &csv::StringRecord, table: &str, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}').trim() == name)
        .ok_or_else(|| BoardError::ArchiveError(format!("{} has no {} column", table, name)))
}

// ============================================================================
// Archive download
// ============================================================================

pub trait ScheduleSource: Send + Sync {
    fn download(&self) -> Result<Bytes>;
}

pub struct HttpScheduleSource {
    url: String,
    timeout: Duration,
}

impl HttpScheduleSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        HttpScheduleSource {
            url: url.into(),
            timeout,
        }
    }
}

impl ScheduleSource for HttpScheduleSource {
    fn download(&self) -> Result<Bytes> {
        info!("Downloading static GTFS archive from {}", self.url);

        let client = create_http_client(self.timeout)?;

        let response = client
            .get(&self.url)
            .send()
            .map_err(|e| BoardError::UpstreamUnavailable(format!("Failed to download GTFS: {}", e)))?;

        if !response.status().is_success() {
            return Err(BoardError::from_status("Static GTFS", response.status()));
        }

        let zip_bytes = response
            .bytes()
            .map_err(|e| BoardError::UpstreamUnavailable(format!("Failed to read GTFS zip: {}", e)))?;

        info!("Downloaded {} KB of static GTFS", zip_bytes.len() / 1024);
        Ok(zip_bytes)
    }
}

// ============================================================================
// Cache service
// ============================================================================

#[derive(Debug, Default)]
struct Generation {
    reference: ScheduleReference,
    /// Stamp of the last successful build; `None` after a failed build.
    built_at: Option<u64>,
    attempted_at: Option<u64>,
}

/// Shared, lazily refreshed schedule reference.
///
/// Readers get the current generation through the `RwLock`; a stale read
/// takes the `refresh` mutex and re-checks before rebuilding, so concurrent
/// stale readers cause one rebuild and never see a half-built table.
pub struct ScheduleCache {
    source: Box<dyn ScheduleSource>,
    cache_file: PathBuf,
    ttl_days: u64,
    retry_after_secs: u64,
    current: RwLock<Arc<Generation>>,
    refresh: Mutex<()>,
}

impl ScheduleCache {
    pub fn new(
        source: Box<dyn ScheduleSource>,
        cache_file: PathBuf,
        ttl_days: u64,
        retry_after_secs: u64,
    ) -> Self {
        ScheduleCache {
            source,
            cache_file,
            ttl_days,
            retry_after_secs,
            current: RwLock::new(Arc::new(Generation::default())),
            refresh: Mutex::new(()),
        }
    }

    pub fn from_config(config: &crate::config::BoardConfig) -> Self {
        let source = HttpScheduleSource::new(
            config.transit.static_gtfs_url.clone(),
            // The archive is tens of megabytes; give it more than a JSON call.
            config.request_timeout() * 12,
        );
        Self::new(
            Box::new(source),
            config.cache_directory().join(CACHE_FILE_NAME),
            config.cache.ttl_days,
            config.cache.retry_after_secs,
        )
    }

    /// Loads or builds the first generation. Safe to call more than once.
    pub fn initialize(&self) {
        let generation = self.fresh_generation();
        info!(
            "Schedule cache ready: {} headsigns, {} termini",
            generation.reference.headsigns.len(),
            generation.reference.termini.len()
        );
    }

    pub fn get_headsign(&self, trip_id: &str) -> Option<String> {
        self.fresh_generation().reference.headsigns.get(trip_id).cloned()
    }

    pub fn get_terminus(&self, trip_id: &str) -> Option<String> {
        self.fresh_generation().reference.termini.get(trip_id).cloned()
    }

    /// Headsign and terminus of one trip, read from the same generation.
    pub fn lookup(&self, trip_id: &str) -> (Option<String>, Option<String>) {
        let generation = self.fresh_generation();
        (
            generation.reference.headsigns.get(trip_id).cloned(),
            generation.reference.termini.get(trip_id).cloned(),
        )
    }

    fn is_fresh(&self, generation: &Generation, now: u64) -> bool {
        match (generation.built_at, generation.attempted_at) {
            (Some(built_at), _) => now.saturating_sub(built_at) < self.ttl_days * SECONDS_PER_DAY,
            (None, Some(attempted_at)) => now.saturating_sub(attempted_at) < self.retry_after_secs,
            (None, None) => false,
        }
    }

    fn read_current(&self) -> Arc<Generation> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn fresh_generation(&self) -> Arc<Generation> {
        let generation = self.read_current();
        if self.is_fresh(&generation, now_secs()) {
            return generation;
        }

        let _refresh = self.refresh.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // Another reader may have rebuilt while we waited.
        let generation = self.read_current();
        if self.is_fresh(&generation, now_secs()) {
            return generation;
        }

        let rebuilt = Arc::new(self.build());
        match self.current.write() {
            Ok(mut guard) => *guard = rebuilt.clone(),
            Err(poisoned) => *poisoned.into_inner() = rebuilt.clone(),
        }
        rebuilt
    }

    fn build(&self) -> Generation {
        let now = now_secs();

        if let Some(reference) = ScheduleReference::load(&self.cache_file, self.ttl_days) {
            return Generation {
                built_at: Some(reference.cached_at),
                attempted_at: Some(now),
                reference,
            };
        }

        let built = self
            .source
            .download()
            .and_then(|zip_bytes| ScheduleReference::from_archive(zip_bytes, now));

        match built {
            Ok(reference) => {
                info!(
                    "Schedule reference built: {} headsigns, {} termini",
                    reference.headsigns.len(),
                    reference.termini.len()
                );
                if let Err(e) = reference.save(&self.cache_file) {
                    warn!("Could not save schedule cache: {}", e);
                }
                Generation {
                    reference,
                    built_at: Some(now),
                    attempted_at: Some(now),
                }
            }
            Err(e) => {
                warn!(
                    "Schedule reference build failed ({}); directions fall back to feed data",
                    e
                );
                Generation {
                    reference: ScheduleReference::default(),
                    built_at: None,
                    attempted_at: Some(now),
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zip::write::FileOptions;

    pub(crate) fn build_archive(stops: &str, trips: &str, stop_times: &str) -> Bytes {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in [
            ("stops.txt", stops),
            ("trips.txt", trips),
            ("stop_times.txt", stop_times),
        ] {
            writer.start_file(name, FileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        Bytes::from(writer.finish().unwrap().into_inner())
    }

    pub(crate) fn sample_archive() -> Bytes {
        build_archive(
            "stop_id,stop_code,stop_name\n\
             A,1,Station Lionel-Groulx\n\
             B,2,Atwater / Sainte-Catherine\n\
             C,3,Station Charlevoix\n",
            "route_id,service_id,trip_id,trip_headsign\n\
             57,wk,T1,Nord\n\
             57,wk,T2,Sud\n\
             24,wk,T3,\n",
            // T1 and T2 are interleaved and T2 is out of sequence order.
            "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
             T1,08:00:00,08:00:00,A,1\n\
             T2,08:10:00,08:10:00,B,2\n\
             T1,08:05:00,08:05:00,B,2\n\
             T2,08:20:00,08:20:00,C,3\n\
             T2,08:00:00,08:00:00,A,1\n\
             T3,09:00:00,09:00:00,C,1\n",
        )
    }

    pub(crate) struct StaticSource(pub(crate) Option<Bytes>);

    impl ScheduleSource for StaticSource {
        fn download(&self) -> Result<Bytes> {
            self.0
                .clone()
                .ok_or_else(|| BoardError::UpstreamUnavailable("offline".to_string()))
        }
    }

    /// A cache over `archive` (or a failing source) with its own temp file.
    pub(crate) fn cache_from_archive(test: &str, archive: Option<Bytes>) -> ScheduleCache {
        ScheduleCache::new(
            Box::new(StaticSource(archive)),
            temp_cache_file(test),
            7,
            300,
        )
    }

    struct CountingSource {
        archive: Option<Bytes>,
        downloads: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl ScheduleSource for CountingSource {
        fn download(&self) -> Result<Bytes> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.archive
                .clone()
                .ok_or_else(|| BoardError::UpstreamUnavailable("offline".to_string()))
        }
    }

    fn temp_cache_file(test: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "departure_board_{}_{}",
            test,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir.join(CACHE_FILE_NAME)
    }

    fn cache_with(
        test: &str,
        archive: Option<Bytes>,
        delay: Duration,
    ) -> (ScheduleCache, Arc<AtomicUsize>, PathBuf) {
        let downloads = Arc::new(AtomicUsize::new(0));
        let file = temp_cache_file(test);
        let source = CountingSource {
            archive,
            downloads: downloads.clone(),
            delay,
        };
        let cache = ScheduleCache::new(Box::new(source), file.clone(), 7, 300);
        (cache, downloads, file)
    }

    #[test]
    fn archive_yields_headsigns_and_last_stop_termini() {
        let reference = ScheduleReference::from_archive(sample_archive(), 42).unwrap();

        assert_eq!(reference.headsigns.get("T1").map(String::as_str), Some("Nord"));
        assert_eq!(reference.headsigns.get("T2").map(String::as_str), Some("Sud"));
        assert!(!reference.headsigns.contains_key("T3"));

        assert_eq!(
            reference.termini.get("T1").map(String::as_str),
            Some("Atwater / Sainte-Catherine")
        );
        assert_eq!(
            reference.termini.get("T2").map(String::as_str),
            Some("Station Charlevoix")
        );
        assert_eq!(
            reference.termini.get("T3").map(String::as_str),
            Some("Station Charlevoix")
        );
        assert_eq!(reference.cached_at, 42);
    }

    #[test]
    fn archive_without_required_table_fails() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("stops.txt", FileOptions::default()).unwrap();
        writer.write_all(b"stop_id,stop_name\nA,Somewhere\n").unwrap();
        let bytes = Bytes::from(writer.finish().unwrap().into_inner());

        assert!(matches!(
            ScheduleReference::from_archive(bytes, 0),
            Err(BoardError::ArchiveError(_))
        ));
    }

    #[test]
    fn garbage_bytes_are_an_archive_error() {
        let result = ScheduleReference::from_archive(Bytes::from_static(b"not a zip"), 0);
        assert!(matches!(result, Err(BoardError::ArchiveError(_))));
    }

    #[test]
    fn save_then_load_round_trips() {
        let file = temp_cache_file("round_trip");
        let mut reference = ScheduleReference::from_archive(sample_archive(), 0).unwrap();
        reference.cached_at = now_secs();

        reference.save(&file).unwrap();
        let loaded = ScheduleReference::load(&file, 7).unwrap();

        assert_eq!(loaded, reference);
        let _ = fs::remove_dir_all(file.parent().unwrap());
    }

    #[test]
    fn reads_within_ttl_download_once() {
        let (cache, downloads, file) =
            cache_with("download_once", Some(sample_archive()), Duration::ZERO);

        assert_eq!(cache.get_headsign("T1").as_deref(), Some("Nord"));
        assert_eq!(cache.get_terminus("T2").as_deref(), Some("Station Charlevoix"));
        assert_eq!(cache.get_headsign("missing"), None);
        assert_eq!(downloads.load(Ordering::SeqCst), 1);
        assert!(file.exists());
        let _ = fs::remove_dir_all(file.parent().unwrap());
    }

    #[test]
    fn young_cache_file_skips_download() {
        let (cache, downloads, file) =
            cache_with("young_file", Some(sample_archive()), Duration::ZERO);
        let mut reference = ScheduleReference::from_archive(sample_archive(), 0).unwrap();
        reference.cached_at = now_secs() - 6 * SECONDS_PER_DAY;
        reference.save(&file).unwrap();

        cache.initialize();
        assert_eq!(cache.get_headsign("T2").as_deref(), Some("Sud"));
        assert_eq!(downloads.load(Ordering::SeqCst), 0);
        let _ = fs::remove_dir_all(file.parent().unwrap());
    }

    #[test]
    fn expired_cache_file_is_rebuilt() {
        let (cache, downloads, file) =
            cache_with("expired_file", Some(sample_archive()), Duration::ZERO);
        let stale = ScheduleReference {
            headsigns: [("T1".to_string(), "Old".to_string())].into_iter().collect(),
            termini: HashMap::new(),
            cached_at: now_secs() - 7 * SECONDS_PER_DAY,
        };
        stale.save(&file).unwrap();

        assert_eq!(cache.get_headsign("T1").as_deref(), Some("Nord"));
        assert_eq!(downloads.load(Ordering::SeqCst), 1);

        let rewritten = ScheduleReference::load(&file, 7).unwrap();
        assert_eq!(rewritten.headsigns.get("T1").map(String::as_str), Some("Nord"));
        let _ = fs::remove_dir_all(file.parent().unwrap());
    }

    #[test]
    fn lookup_reads_one_generation_for_both_tables() {
        let (cache, downloads, file) =
            cache_with("lookup", Some(sample_archive()), Duration::ZERO);

        assert_eq!(
            cache.lookup("T1"),
            (
                Some("Nord".to_string()),
                Some("Atwater / Sainte-Catherine".to_string())
            )
        );
        assert_eq!(cache.lookup("T3"), (None, Some("Station Charlevoix".to_string())));
        assert_eq!(cache.lookup("missing"), (None, None));
        assert_eq!(downloads.load(Ordering::SeqCst), 1);
        let _ = fs::remove_dir_all(file.parent().unwrap());
    }

    #[test]
    fn failed_build_leaves_empty_tables_and_backs_off() {
        let (cache, downloads, file) = cache_with("failed_build", None, Duration::ZERO);

        assert_eq!(cache.get_headsign("T1"), None);
        assert_eq!(cache.get_terminus("T1"), None);
        assert_eq!(downloads.load(Ordering::SeqCst), 1);
        assert!(!file.exists());
    }

    #[test]
    fn concurrent_stale_readers_trigger_one_download() {
        let (cache, downloads, file) = cache_with(
            "concurrent",
            Some(sample_archive()),
            Duration::from_millis(100),
        );

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    assert_eq!(cache.get_headsign("T1").as_deref(), Some("Nord"));
                });
            }
        });

        assert_eq!(downloads.load(Ordering::SeqCst), 1);
        let _ = fs::remove_dir_all(file.parent().unwrap());
    }
}
