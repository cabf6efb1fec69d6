//! Incremental ID-list downloads.
//!
//! The server's `/v1/get_id_lists` directory describes one append/delete byte stream per list.
//! Each sync cycle diffs the directory against local state, downloads the unread byte ranges on
//! a bounded worker pool, and applies `+ID` / `-ID` lines to the in-memory sets held by the
//! [`SpecStore`](crate::spec_store::SpecStore).
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::spec_store::SpecStore;
use crate::spec_types::IdListMetadata;
use crate::Result;

/// One set-membership list plus the cursor into its remote byte stream.
#[derive(Debug, Clone, Default)]
pub struct IdList {
    pub name: String,
    pub ids: HashSet<String>,
    /// Cursor into the remote file; the next ranged GET starts here.
    pub read_bytes: u64,
    pub url: Option<String>,
    pub file_id: Option<String>,
    pub creation_time: u64,
}

impl IdList {
    fn from_metadata(metadata: &IdListMetadata) -> IdList {
        IdList {
            name: metadata.name.clone(),
            ids: HashSet::new(),
            read_bytes: 0,
            url: metadata.url.clone(),
            file_id: metadata.file_id.clone(),
            creation_time: metadata.creation_time,
        }
    }

    /// Apply one append/delete chunk. The chunk must start with `+` or `-`; anything else is
    /// corrupt (e.g., an HTML error page) and the whole response is discarded.
    fn apply_chunk(&mut self, chunk: &str) {
        if !chunk.starts_with(['+', '-']) {
            log::warn!(target: "statsig", "discarding corrupt id list chunk for {}", self.name);
            return;
        }
        // Entries are `\r`-terminated on the wire; a `\r\n` pair is tolerated.
        for line in chunk.split('\r') {
            let line = line.trim_start_matches('\n');
            if line.len() < 2 {
                continue;
            }
            let (op, id) = line.split_at(1);
            match op {
                "+" => {
                    self.ids.insert(id.to_owned());
                }
                "-" => {
                    self.ids.remove(id);
                }
                _ => {}
            }
        }
        self.read_bytes += chunk.len() as u64;
    }
}

/// Fetches one ranged chunk of an ID-list file, starting at byte `range_start`.
pub trait IdListChunkFetcher: Send + Sync {
    fn fetch_chunk(&self, url: &str, range_start: u64) -> Result<String>;
}

/// Drives the per-cycle diff + download + apply sequence.
pub struct IdListManager {
    store: Arc<SpecStore>,
    fetcher: Arc<dyn IdListChunkFetcher>,
    threadpool_size: usize,
}

struct PendingDownload {
    name: String,
    url: String,
    range_start: u64,
}

impl IdListManager {
    pub fn new(
        store: Arc<SpecStore>,
        fetcher: Arc<dyn IdListChunkFetcher>,
        threadpool_size: usize,
    ) -> IdListManager {
        IdListManager {
            store,
            fetcher,
            threadpool_size: threadpool_size.max(1),
        }
    }

    /// Run one sync cycle against the server's list directory.
    pub fn sync(&self, directory: &HashMap<String, IdListMetadata>) {
        let downloads = self.diff(directory);
        if downloads.is_empty() {
            return;
        }

        // Bounded worker pool: at most `threadpool_size` concurrent ranged GETs. The per-request
        // timeout bounds the whole batch to well under the sync interval.
        for batch in downloads.chunks(self.threadpool_size) {
            let chunks: Vec<(String, Option<String>)> = std::thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|download| {
                        let fetcher = self.fetcher.clone();
                        scope.spawn(move || {
                            let chunk = fetcher
                                .fetch_chunk(&download.url, download.range_start)
                                .map_err(|err| {
                                    log::warn!(
                                        target: "statsig",
                                        "failed to download id list chunk for {}: {}",
                                        download.name,
                                        err
                                    );
                                })
                                .ok();
                            (download.name.clone(), chunk)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|handle| handle.join().ok())
                    .collect()
            });

            self.store.with_id_lists_mut(|lists| {
                for (name, chunk) in chunks {
                    if let (Some(list), Some(chunk)) = (lists.get_mut(&name), chunk) {
                        list.apply_chunk(&chunk);
                    }
                }
            });
        }
    }

    /// Diff the server directory against local lists and return the ranged downloads to run.
    fn diff(&self, directory: &HashMap<String, IdListMetadata>) -> Vec<PendingDownload> {
        self.store.with_id_lists_mut(|lists| {
            let mut downloads = Vec::new();

            for (name, metadata) in directory {
                let needs_reset = match lists.get(name) {
                    None => true,
                    Some(local) => {
                        local.file_id != metadata.file_id
                            && metadata.creation_time >= local.creation_time
                    }
                };
                if needs_reset {
                    let mut metadata = metadata.clone();
                    metadata.name = name.clone();
                    lists.insert(name.clone(), IdList::from_metadata(&metadata));
                }

                let local = lists
                    .get(name)
                    .expect("list was inserted above if missing");
                let Some(url) = local.url.clone().filter(|u| !u.is_empty()) else {
                    continue;
                };
                if metadata.size <= local.read_bytes {
                    continue;
                }
                downloads.push(PendingDownload {
                    name: name.clone(),
                    url,
                    range_start: local.read_bytes,
                });
            }

            // Lists no longer present server-side are dropped at cycle end.
            lists.retain(|name, _| directory.contains_key(name));

            downloads
        })
    }
}
