use crate::{
    compute_method::LeafScanner,
    recorder::Recorder,
    tree::{BoundingBox, HybridTree},
    Config, Error, Result,
};

/// Aggregated outcome of [`SearchSession::search`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchReport {
    /// Number of queries evaluated.
    pub queries: usize,
    /// Overlapping points over every query.
    pub hits: u64,
    /// Overlapping points of each query.
    pub query_hits: Vec<u64>,
    /// Nodes visited by the host traversal.
    pub host_visits: u64,
    /// Leaf nodes visited by the scanner.
    pub device_visits: u64,
    /// Leaf scans issued.
    pub jumps: u64,
}

impl SearchReport {
    /// Average number of leaf scans per query.
    #[inline]
    pub fn average_jumps(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.jumps as f64 / self.queries as f64
        }
    }
}

/// Host side of a search: walks the internal nodes of a [`HybridTree`] to find where the next
/// run of leaf nodes should be scanned, and hands that run to a [`LeafScanner`].
///
/// The leaf layer is staged on the scanner once, when the session is created, and shared by every
/// query of the session.
pub struct SearchSession<'a, const D: usize, S> {
    tree: &'a HybridTree<D>,
    scanner: S,
    chunk_size: u32,
}

impl<'a, const D: usize, S> SearchSession<'a, D, S>
where
    S: LeafScanner<D>,
{
    /// Stages the leaf layer of `tree` on `scanner`.
    ///
    /// The scanner must run `config.workgroups` work-groups.
    pub fn new(tree: &'a HybridTree<D>, config: &Config, mut scanner: S) -> Result<Self> {
        config.validate()?;
        if scanner.workgroups() != config.workgroups {
            return Err(Error::InvalidConfig(format!(
                "scanner runs {} work-groups, configuration asks for {}",
                scanner.workgroups(),
                config.workgroups
            )));
        }

        let recorder = Recorder::start();
        scanner.stage(tree.leaves())?;
        log::info!(
            "Staged {} leaf nodes in {:.3}ms",
            tree.leaf_node_count(),
            recorder.elapsed_ms()
        );

        Ok(Self {
            tree,
            scanner,
            chunk_size: config.chunk_size,
        })
    }

    /// Tree searched by this session.
    #[inline]
    pub fn tree(&self) -> &HybridTree<D> {
        self.tree
    }

    /// Scanner used by this session.
    #[inline]
    pub fn scanner(&mut self) -> &mut S {
        &mut self.scanner
    }

    /// Evaluates the first `number_of_search` queries one after the other.
    ///
    /// The scanner counters are zeroed first, so the report only covers these queries.
    pub fn search(
        &mut self,
        queries: &[BoundingBox<[f32; D]>],
        number_of_search: usize,
    ) -> Result<SearchReport> {
        if number_of_search > queries.len() {
            log::warn!(
                "Requested {number_of_search} searches but only {} queries are available",
                queries.len()
            );
        }
        let queries = &queries[..number_of_search.min(queries.len())];

        let recorder = Recorder::start();
        self.scanner.reset_counters()?;

        let mut report = SearchReport {
            queries: queries.len(),
            query_hits: Vec::with_capacity(queries.len()),
            ..SearchReport::default()
        };
        let mut hits_so_far = 0;

        for query in queries {
            let (visits, jumps) = self.jump(query)?;
            report.host_visits += visits;
            report.jumps += jumps;

            let hits = self.scanner.counters()?.total_hits();
            report.query_hits.push(hits - hits_so_far);
            hits_so_far = hits;
        }

        let counters = self.scanner.counters()?;
        report.hits = counters.total_hits();
        report.device_visits = counters.total_visits();

        log::info!("Avg. Jump Count {:.3}", report.average_jumps());
        log::info!("Search time = {:.3}ms", recorder.elapsed_ms());
        log::info!("Hit : {}", report.hits);
        log::info!("Node visit count on host : {}", report.host_visits);
        log::info!("Node visit count on device : {}", report.device_visits);

        Ok(report)
    }

    /// Resolves one query: alternates traversal and leaf scans until no unvisited leaf node can
    /// overlap `query`. Returns the host node visits and the number of scans issued.
    pub fn jump(&mut self, query: &BoundingBox<[f32; D]>) -> Result<(u64, u64)> {
        let degree = self.tree.degree() as u64;

        let mut visited = 0;
        let mut visits = 0;
        let mut jumps = 0;

        while let Some(index) = self.tree.traverse(query, visited, &mut visits) {
            let end = self.scan_from(query, index)?;
            visited = u64::from(end) * degree;
            jumps += 1;
        }

        Ok((visits, jumps))
    }

    /// Scans one chunk of leaf nodes starting at the node holding ordinal `index`, clipped to the
    /// end of the leaf layer. Returns the first leaf node past the chunk.
    fn scan_from(&mut self, query: &BoundingBox<[f32; D]>, index: u64) -> Result<u32> {
        let degree = self.tree.degree() as u64;
        let leaf_count = self.tree.leaf_node_count();

        let start = index
            .checked_sub(1)
            .map(|ordinal| ordinal / degree)
            .filter(|&start| start < u64::from(leaf_count))
            .ok_or_else(|| {
                Error::Corrupt(format!(
                    "traversal reached ordinal {index} outside of {leaf_count} leaf nodes"
                ))
            })? as u32;
        let chunk = self.chunk_size.min(leaf_count - start);
        log::trace!("Scanning leaf nodes {start}..{}", start + chunk);

        self.scanner.scan(query, start, chunk)?;
        Ok(start + chunk)
    }
}

impl<const D: usize, S> std::fmt::Debug for SearchSession<'_, D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSession")
            .field("tree", self.tree)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}
