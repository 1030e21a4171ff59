use crate::bucket::Bucket;
use crate::common::Map;
use crate::constraints::Constraint;
use crate::demand::result::{DemandResult, group_requests};
use crate::job::{Job, PackingStrategy};
use crate::node::Node;
use crate::resources::ResourceMap;
use crate::shared::SharedPools;
use crate::{JobName, Set};

#[derive(Debug, Clone, Default)]
pub struct DemandConfig {
    /// Matching stops once this many jobs could not be matched.
    pub max_unmatched_jobs: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched { slots: u32 },
    /// Only the first `iterations` iterations found capacity.
    Partial { iterations: u32, slots: u32 },
    Running { hostname: String },
    Unmatched { reason: String },
    /// Not attempted because the unmatched ceiling was reached.
    Skipped,
}

struct BucketState {
    bucket: Bucket,
    remaining: u32,
}

/// Remaining capacity of one node while a job is being planned.
#[derive(Debug, Clone)]
struct Scratch {
    available: ResourceMap,
    slots: u32,
    exclusive_owner: Option<String>,
    /// No further slot of the current job fits. Capacity only shrinks while a job is
    /// planned, so the node is not visited again.
    full: bool,
}

impl Scratch {
    fn from_node(node: &Node) -> Self {
        Scratch {
            available: node.available.clone(),
            slots: 0,
            exclusive_owner: node.exclusive_owner.clone(),
            full: false,
        }
    }
}

#[derive(Debug, Clone)]
struct NewNode {
    bucket: usize,
    placement_group: Option<String>,
    scratch: Scratch,
}

/// Tentative placement of a single job. It is committed only when at least one iteration fits.
#[derive(Debug)]
struct Plan {
    pools: SharedPools,
    existing: Map<usize, Scratch>,
    new_nodes: Vec<NewNode>,
    bucket_used: Map<usize, u32>,
    placement_group: Option<String>,
    /// Existing nodes before this index cannot take another slot of the job.
    existing_from: usize,
    /// New nodes before this index are full.
    new_from: usize,
}

impl Plan {
    fn new(pools: SharedPools) -> Self {
        Plan {
            pools,
            existing: Map::default(),
            new_nodes: Vec::new(),
            bucket_used: Map::default(),
            placement_group: None,
            existing_from: 0,
            new_from: 0,
        }
    }

    fn slots(&self) -> u32 {
        self.existing.values().map(|s| s.slots).sum::<u32>()
            + self.new_nodes.iter().map(|n| n.scratch.slots).sum::<u32>()
    }

    fn undo_log(&self) -> UndoLog {
        UndoLog {
            pools: self.pools.clone(),
            placement_group: self.placement_group.clone(),
            new_nodes_len: self.new_nodes.len(),
            existing: Map::default(),
            new_nodes: Map::default(),
            bucket_used: Map::default(),
        }
    }

    /// Restores the state recorded in `undo`, dropping everything a failed iteration placed.
    fn rollback(&mut self, undo: UndoLog) {
        self.pools = undo.pools;
        self.placement_group = undo.placement_group;
        self.new_nodes.truncate(undo.new_nodes_len);
        for (idx, scratch) in undo.new_nodes {
            self.new_nodes[idx].scratch = scratch;
        }
        for (idx, scratch) in undo.existing {
            match scratch {
                Some(scratch) => self.existing.insert(idx, scratch),
                None => self.existing.remove(&idx),
            };
        }
        for (bucket, used) in undo.bucket_used {
            self.bucket_used.insert(bucket, used);
        }
    }
}

/// State of a [`Plan`] before an iteration, limited to what the iteration touched.
struct UndoLog {
    pools: SharedPools,
    placement_group: Option<String>,
    new_nodes_len: usize,
    existing: Map<usize, Option<Scratch>>,
    new_nodes: Map<usize, Scratch>,
    bucket_used: Map<usize, u32>,
}

struct SlotRequest<'a> {
    job: &'a Job,
    key: &'a str,
    exclusive: bool,
}

impl SlotRequest<'_> {
    /// Tries to place one slot on a node, updating the scratch state on success.
    fn try_place(
        &self,
        placement_group: Option<&str>,
        has_assignments: bool,
        scratch: &mut Scratch,
        pools: &mut SharedPools,
    ) -> bool {
        match (&scratch.exclusive_owner, self.exclusive) {
            (Some(owner), true) if owner != self.key => return false,
            (None, true) if has_assignments || scratch.slots > 0 => return false,
            (Some(_), false) => return false,
            _ => {}
        }
        let mut available = scratch.available.clone();
        let mut trial = pools.clone();
        if !self
            .job
            .constraints
            .iter()
            .all(|c| c.apply(placement_group, &mut available, &mut trial))
        {
            return false;
        }
        scratch.available = available;
        scratch.slots += 1;
        if self.exclusive {
            scratch.exclusive_owner = Some(self.key.to_string());
        }
        *pools = trial;
        true
    }

    /// Places up to `remaining` slots on a node, respecting the packing strategy.
    fn fill(
        &self,
        placement_group: Option<&str>,
        has_assignments: bool,
        scratch: &mut Scratch,
        pools: &mut SharedPools,
        remaining: u32,
    ) -> u32 {
        let limit = match self.job.packing_strategy {
            PackingStrategy::Scatter => remaining.min(1),
            PackingStrategy::Pack => remaining,
        };
        let mut placed = 0;
        while placed < limit {
            if !self.try_place(placement_group, has_assignments, scratch, pools) {
                scratch.full = true;
                break;
            }
            placed += 1;
        }
        placed
    }
}

/// Matches jobs against existing nodes first and then against buckets, producing
/// virtual new nodes where the existing capacity is not enough.
pub struct DemandCalculator {
    nodes: Vec<Node>,
    buckets: Vec<BucketState>,
    pools: SharedPools,
    config: DemandConfig,
    matched_jobs: Vec<JobName>,
    unmatched_jobs: Vec<JobName>,
    unmatched_count: usize,
    new_node_counter: Map<String, u32>,
}

impl DemandCalculator {
    pub fn new(
        nodes: Vec<Node>,
        buckets: Vec<Bucket>,
        pools: SharedPools,
        config: DemandConfig,
    ) -> Self {
        let buckets = buckets
            .into_iter()
            .map(|bucket| BucketState {
                remaining: bucket.available_count,
                bucket,
            })
            .collect();
        DemandCalculator {
            nodes,
            buckets,
            pools,
            config,
            matched_jobs: Vec::new(),
            unmatched_jobs: Vec::new(),
            unmatched_count: 0,
            new_node_counter: Map::default(),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn pools(&self) -> &SharedPools {
        &self.pools
    }

    pub fn add_jobs<'a>(&mut self, jobs: impl IntoIterator<Item = &'a Job>) -> Vec<MatchOutcome> {
        jobs.into_iter().map(|job| self.add_job(job)).collect()
    }

    pub fn add_job(&mut self, job: &Job) -> MatchOutcome {
        if let Some(hostname) = &job.executing_hostname {
            return self.bind_running(job, hostname);
        }
        if self
            .config
            .max_unmatched_jobs
            .is_some_and(|max| self.unmatched_count >= max)
        {
            log::debug!("Skipping job {}, too many unmatched jobs", job.name);
            self.unmatched_jobs.push(job.name.clone());
            return MatchOutcome::Skipped;
        }

        let iterations = job.iterations.max(1);
        let exclusive = job.is_exclusive();
        let mut plan = Plan::new(self.pools.clone());
        let mut matched_iterations = 0;
        for iteration in 0..iterations {
            let key = if iterations > 1 {
                format!("{}[{}]", job.name, iteration)
            } else {
                job.name.clone()
            };
            let request = SlotRequest {
                job,
                key: &key,
                exclusive,
            };
            let placed = if job.colocated && plan.placement_group.is_none() {
                self.try_colocated_iteration(&request, &mut plan)
            } else {
                let group = plan.placement_group.clone();
                self.try_iteration(&request, &mut plan, group.as_deref())
            };
            if !placed {
                break;
            }
            matched_iterations += 1;
        }

        let slots = plan.slots();
        if matched_iterations > 0 {
            self.commit(job, plan);
        }
        let outcome = if matched_iterations == iterations {
            self.matched_jobs.push(job.name.clone());
            MatchOutcome::Matched { slots }
        } else {
            self.unmatched_count += 1;
            self.unmatched_jobs.push(job.name.clone());
            if matched_iterations > 0 {
                MatchOutcome::Partial {
                    iterations: matched_iterations,
                    slots,
                }
            } else {
                MatchOutcome::Unmatched {
                    reason: self.unmatched_reason(job),
                }
            }
        };
        log::debug!("Job {}: {:?}", job.name, outcome);
        outcome
    }

    pub fn finish(self) -> DemandResult {
        let requests = group_requests(&self.nodes);
        DemandResult {
            compute_nodes: self.nodes,
            requests,
            matched_jobs: self.matched_jobs,
            unmatched_jobs: self.unmatched_jobs,
        }
    }

    fn bind_running(&mut self, job: &Job, hostname: &str) -> MatchOutcome {
        let Some(node) = self.nodes.iter_mut().find(|n| {
            n.hostname_or_name().eq_ignore_ascii_case(hostname) || n.name == hostname
        }) else {
            log::warn!(
                "Could not find node {hostname} for running job {}",
                job.name
            );
            return MatchOutcome::Unmatched {
                reason: format!("unknown host {hostname}"),
            };
        };
        for constraint in &job.constraints {
            match constraint {
                Constraint::HostResources(resources) => {
                    for request in resources.iter().filter(|r| r.consumable) {
                        let left = node
                            .available
                            .get(&request.name)
                            .and_then(|value| value.minus(&request.value));
                        if let Some(left) = left {
                            node.available.insert(request.name.clone(), left);
                        }
                    }
                }
                Constraint::Exclusive { .. } => {
                    node.exclusive_owner = Some(job.name.clone());
                }
                _ => {}
            }
        }
        node.bind_running(job.name.clone());
        self.matched_jobs.push(job.name.clone());
        MatchOutcome::Running {
            hostname: hostname.to_string(),
        }
    }

    fn is_candidate(node: &Node, job: &Job, group: Option<&str>) -> bool {
        if node.closed {
            return false;
        }
        match group {
            Some(group) => node.placement_group.as_deref() == Some(group),
            None => !job.colocated || node.placement_group.is_some(),
        }
    }

    /// Placement groups a colocated job may use, existing nodes first.
    fn placement_groups(&self, job: &Job) -> Vec<String> {
        let mut seen = Set::default();
        let existing = self
            .nodes
            .iter()
            .filter(|node| Self::is_candidate(node, job, None))
            .filter_map(|node| node.placement_group.clone());
        let from_buckets = self
            .buckets
            .iter()
            .filter_map(|state| state.bucket.placement_group.clone());
        existing
            .chain(from_buckets)
            .filter(|group| seen.insert(group.clone()))
            .collect()
    }

    fn try_colocated_iteration(&self, request: &SlotRequest, plan: &mut Plan) -> bool {
        for group in self.placement_groups(request.job) {
            plan.placement_group = Some(group.clone());
            if self.try_iteration(request, plan, Some(&group)) {
                return true;
            }
        }
        plan.placement_group = None;
        false
    }

    /// Places all `node_count` slots of one iteration or nothing.
    fn try_iteration(&self, request: &SlotRequest, plan: &mut Plan, group: Option<&str>) -> bool {
        let mut undo = plan.undo_log();
        if self.place_iteration(request, plan, group, &mut undo) {
            self.advance_cursors(request.job, plan, group);
            true
        } else {
            plan.rollback(undo);
            false
        }
    }

    /// Moves the plan cursors past nodes that no later iteration can use. Iterations after
    /// a successful one run with the same placement group, so the skipped nodes stay unusable.
    fn advance_cursors(&self, job: &Job, plan: &mut Plan, group: Option<&str>) {
        while let Some(node) = self.nodes.get(plan.existing_from) {
            let done = !Self::is_candidate(node, job, group)
                || plan
                    .existing
                    .get(&plan.existing_from)
                    .is_some_and(|scratch| scratch.full);
            if !done {
                break;
            }
            plan.existing_from += 1;
        }
        while plan
            .new_nodes
            .get(plan.new_from)
            .is_some_and(|new_node| new_node.scratch.full)
        {
            plan.new_from += 1;
        }
    }

    fn place_iteration(
        &self,
        request: &SlotRequest,
        plan: &mut Plan,
        group: Option<&str>,
        undo: &mut UndoLog,
    ) -> bool {
        let job = request.job;
        let mut remaining = job.node_count.max(1);

        for (idx, node) in self.nodes.iter().enumerate().skip(plan.existing_from) {
            if remaining == 0 {
                return true;
            }
            if !Self::is_candidate(node, job, group) {
                continue;
            }
            let previous = plan.existing.get(&idx);
            if previous.is_some_and(|scratch| scratch.full) {
                continue;
            }
            undo.existing
                .entry(idx)
                .or_insert_with(|| previous.cloned());
            let scratch = plan
                .existing
                .entry(idx)
                .or_insert_with(|| Scratch::from_node(node));
            remaining -= request.fill(
                node.placement_group.as_deref(),
                node.has_assignments(),
                scratch,
                &mut plan.pools,
                remaining,
            );
        }

        for (idx, new_node) in plan.new_nodes.iter_mut().enumerate().skip(plan.new_from) {
            if remaining == 0 {
                return true;
            }
            if new_node.scratch.full
                || (group.is_some() && new_node.placement_group.as_deref() != group)
            {
                continue;
            }
            if idx < undo.new_nodes_len {
                undo.new_nodes
                    .entry(idx)
                    .or_insert_with(|| new_node.scratch.clone());
            }
            remaining -= request.fill(
                new_node.placement_group.as_deref(),
                false,
                &mut new_node.scratch,
                &mut plan.pools,
                remaining,
            );
        }

        for (bucket_idx, state) in self.buckets.iter().enumerate() {
            let bucket = &state.bucket;
            match group {
                Some(group) if bucket.placement_group.as_deref() != Some(group) => continue,
                None if job.colocated && bucket.placement_group.is_none() => continue,
                _ => {}
            }
            while remaining > 0 {
                let used = plan.bucket_used.get(&bucket_idx).copied().unwrap_or(0);
                if used >= state.remaining {
                    break;
                }
                let mut scratch = Scratch {
                    available: bucket.resources.clone(),
                    slots: 0,
                    exclusive_owner: None,
                    full: false,
                };
                let placed = request.fill(
                    bucket.placement_group.as_deref(),
                    false,
                    &mut scratch,
                    &mut plan.pools,
                    remaining,
                );
                if placed == 0 {
                    break;
                }
                remaining -= placed;
                undo.bucket_used.entry(bucket_idx).or_insert(used);
                *plan.bucket_used.entry(bucket_idx).or_default() += 1;
                plan.new_nodes.push(NewNode {
                    bucket: bucket_idx,
                    placement_group: bucket.placement_group.clone(),
                    scratch,
                });
            }
            if remaining == 0 {
                break;
            }
        }
        remaining == 0
    }

    fn commit(&mut self, job: &Job, plan: Plan) {
        for (idx, scratch) in plan.existing {
            if scratch.slots == 0 {
                continue;
            }
            let node = &mut self.nodes[idx];
            node.available = scratch.available;
            node.exclusive_owner = scratch.exclusive_owner;
            node.assign(job.name.clone());
        }
        for new_node in plan.new_nodes {
            let state = &mut self.buckets[new_node.bucket];
            state.remaining = state.remaining.saturating_sub(1);
            let counter = self
                .new_node_counter
                .entry(state.bucket.nodearray.clone())
                .or_default();
            *counter += 1;
            let name = format!("{}-new-{}", state.bucket.nodearray, counter);
            let mut node = state.bucket.new_node(name);
            node.available = new_node.scratch.available;
            node.exclusive_owner = new_node.scratch.exclusive_owner;
            node.assign(job.name.clone());
            self.nodes.push(node);
        }
        self.pools = plan.pools;
    }

    fn unmatched_reason(&self, job: &Job) -> String {
        if job.colocated && self.placement_groups(job).is_empty() {
            return "no placement group available".to_string();
        }
        if self.buckets.iter().all(|state| state.remaining == 0) {
            return "no capacity left in any bucket".to_string();
        }
        let constraints: Vec<_> = job.constraints.iter().map(|c| c.to_string()).collect();
        format!("no node satisfies [{}]", constraints.join(", "))
    }
}
