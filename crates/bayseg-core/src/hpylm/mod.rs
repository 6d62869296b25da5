//! Hierarchical Pitman-Yor language model over an arena of restaurants.
//!
//! A context is a slice of tokens ordered oldest to newest. The node for a
//! context hangs `context.len()` levels below the root, reached by following
//! the newest token first. Nodes are created lazily on add and pruned as soon
//! as they hold no customers, no stop/pass counts and no children.


use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug_span;

use crate::config::ModelConfig;
use crate::error::{Result, SegError};
use crate::hyper::{self, DepthPrior};
use crate::restaurant::Restaurant;
use crate::token::Token;

pub type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug, Clone, Default)]
struct Node {
    restaurant: Restaurant,
    parent: Option<NodeId>,
    /// Token on the edge from the parent; `None` for the root.
    key: Option<Token>,
    children: HashMap<Token, NodeId>,
    depth: usize,
    /// Times a variable-order customer stopped at this node.
    stop: u32,
    /// Times a variable-order customer passed through this node to a deeper one.
    pass: u32,
    live: bool,
}

impl Node {
    fn is_prunable(&self) -> bool {
        self.restaurant.is_empty() && self.children.is_empty() && self.stop == 0 && self.pass == 0
    }
}

#[derive(Debug, Clone)]
pub struct Hpylm {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    max_depth: usize,
    theta: Vec<f64>,
    d: Vec<f64>,
    priors: Vec<DepthPrior>,
}

impl Hpylm {
    /// An empty model whose contexts hold at most `max_depth` tokens.
    pub fn new(max_depth: usize, config: &ModelConfig) -> Self {
        let root = Node {
            live: true,
            ..Node::default()
        };
        let prior = DepthPrior {
            gamma_a: config.gamma_a,
            gamma_b: config.gamma_b,
            beta_a: config.beta_a,
            beta_b: config.beta_b,
        };
        Self {
            nodes: vec![root],
            free: Vec::new(),
            max_depth,
            theta: vec![config.theta; max_depth + 1],
            d: vec![config.d; max_depth + 1],
            priors: vec![prior; max_depth + 1],
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn theta(&self) -> &[f64] {
        &self.theta
    }

    pub fn d(&self) -> &[f64] {
        &self.d
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.live).count()
    }

    /// True when no customer is seated anywhere and only the root remains.
    pub fn is_empty(&self) -> bool {
        self.nodes[ROOT].is_prunable() && self.node_count() == 1
    }

    /// Customers seated at the root restaurant.
    pub fn root_customers(&self) -> u32 {
        self.nodes[ROOT].restaurant.total_customers()
    }

    fn check_depth(&self, context: &[Token]) -> Result<()> {
        if context.len() > self.max_depth {
            return Err(SegError::Consistency(format!(
                "context of length {} exceeds maximum depth {}",
                context.len(),
                self.max_depth
            )));
        }
        Ok(())
    }

    fn child(&self, id: NodeId, key: &Token) -> Option<NodeId> {
        self.nodes[id].children.get(key).copied()
    }

    /// Existing nodes along the context path, root first. Shorter than
    /// `context.len() + 1` when a deeper node has never been created.
    fn existing_path(&self, context: &[Token]) -> Vec<NodeId> {
        let mut path = Vec::with_capacity(context.len() + 1);
        let mut id = ROOT;
        path.push(id);
        for key in context.iter().rev() {
            match self.child(id, key) {
                Some(next) => {
                    id = next;
                    path.push(id);
                }
                None => break,
            }
        }
        path
    }

    fn alloc(&mut self, parent: NodeId, key: Token) -> NodeId {
        let node = Node {
            parent: Some(parent),
            key: Some(key.clone()),
            depth: self.nodes[parent].depth + 1,
            live: true,
            ..Node::default()
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.nodes[parent].children.insert(key, id);
        id
    }

    /// Full path for `context`, creating missing nodes.
    fn path_or_create(&mut self, context: &[Token]) -> Vec<NodeId> {
        let mut path = Vec::with_capacity(context.len() + 1);
        let mut id = ROOT;
        path.push(id);
        for key in context.iter().rev() {
            id = match self.child(id, key) {
                Some(next) => next,
                None => self.alloc(id, key.clone()),
            };
            path.push(id);
        }
        path
    }

    /// Full path for `context`; every node must already exist.
    fn path_existing(&self, context: &[Token]) -> Result<Vec<NodeId>> {
        let path = self.existing_path(context);
        if path.len() != context.len() + 1 {
            return Err(SegError::Consistency(format!(
                "context {} has no restaurant",
                display_context(context)
            )));
        }
        Ok(path)
    }

    /// Smoothed probability of `dish` at every depth of `context`, root
    /// first: element `k` conditions on the newest `k` tokens.
    pub fn probabilities_by_depth(&self, dish: &Token, context: &[Token], base: f64) -> Vec<f64> {
        let path = self.existing_path(context);
        let mut probs = Vec::with_capacity(context.len() + 1);
        let mut p = base;
        for k in 0..=context.len() {
            if let Some(&id) = path.get(k) {
                p = self.nodes[id]
                    .restaurant
                    .probability(dish, p, self.theta[k], self.d[k]);
            }
            probs.push(p);
        }
        probs
    }

    /// `P(dish | context)` backing off through every suffix down to `base`.
    pub fn probability(&self, dish: &Token, context: &[Token], base: f64) -> f64 {
        let mut p = base;
        let mut id = ROOT;
        p = self.nodes[id]
            .restaurant
            .probability(dish, p, self.theta[0], self.d[0]);
        for (k, key) in context.iter().rev().enumerate() {
            match self.child(id, key) {
                Some(next) => {
                    id = next;
                    p = self.nodes[id]
                        .restaurant
                        .probability(dish, p, self.theta[k + 1], self.d[k + 1]);
                }
                None => break,
            }
        }
        p
    }

    /// Seat `dish` in the restaurant for `context`, sending proxy customers
    /// towards the root while new tables open. Returns `true` when the root
    /// opened a new table, i.e. the base measure drew a new customer.
    pub fn add_customer<R: Rng + ?Sized>(
        &mut self,
        dish: &Token,
        context: &[Token],
        base: f64,
        rng: &mut R,
    ) -> Result<bool> {
        self.check_depth(context)?;
        let probs = self.probabilities_by_depth(dish, context, base);
        let path = self.path_or_create(context);
        for k in (0..path.len()).rev() {
            let parent = if k == 0 { base } else { probs[k - 1] };
            let (theta, d) = (self.theta[k], self.d[k]);
            let opened = self.nodes[path[k]]
                .restaurant
                .add_customer(dish, parent, theta, d, rng);
            if !opened {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Inverse of [`Hpylm::add_customer`]. Returns `true` when a root table
    /// closed, i.e. the base measure lost a customer.
    pub fn remove_customer<R: Rng + ?Sized>(
        &mut self,
        dish: &Token,
        context: &[Token],
        rng: &mut R,
    ) -> Result<bool> {
        self.check_depth(context)?;
        let path = self.path_existing(context)?;
        let mut base_removed = true;
        for &id in path.iter().rev() {
            let (table_removed, _) = self.nodes[id].restaurant.remove_customer(dish, rng)?;
            if !table_removed {
                base_removed = false;
                break;
            }
        }
        self.prune(&path);
        Ok(base_removed)
    }

    /// `(stop, pass)` counts at every depth of `context`, root first.
    pub fn stop_pass_by_depth(&self, context: &[Token]) -> Vec<(u32, u32)> {
        let path = self.existing_path(context);
        (0..=context.len())
            .map(|k| {
                path.get(k)
                    .map_or((0, 0), |&id| (self.nodes[id].stop, self.nodes[id].pass))
            })
            .collect()
    }

    /// Record that a customer stopped at the node for `context` and passed
    /// through every shallower node.
    pub fn add_stop_pass(&mut self, context: &[Token]) -> Result<()> {
        self.check_depth(context)?;
        let path = self.path_or_create(context);
        let (last, shallower) = path.split_last().ok_or_else(|| {
            SegError::Consistency("empty context path".into())
        })?;
        self.nodes[*last].stop += 1;
        for &id in shallower {
            self.nodes[id].pass += 1;
        }
        Ok(())
    }

    pub fn remove_stop_pass(&mut self, context: &[Token]) -> Result<()> {
        self.check_depth(context)?;
        let path = self.path_existing(context)?;
        let (&last, shallower) = path
            .split_last()
            .ok_or_else(|| SegError::Consistency("empty context path".into()))?;
        if self.nodes[last].stop == 0 || shallower.iter().any(|&id| self.nodes[id].pass == 0) {
            return Err(SegError::Consistency(format!(
                "stop/pass counts underflow at {}",
                display_context(context)
            )));
        }
        self.nodes[last].stop -= 1;
        for &id in shallower {
            self.nodes[id].pass -= 1;
        }
        self.prune(&path);
        Ok(())
    }

    /// Free empty nodes on `path`, deepest first. The root is never freed.
    fn prune(&mut self, path: &[NodeId]) {
        for &id in path.iter().rev() {
            if id == ROOT || !self.nodes[id].is_prunable() {
                break;
            }
            let node = std::mem::take(&mut self.nodes[id]);
            if let (Some(parent), Some(key)) = (node.parent, node.key) {
                self.nodes[parent].children.remove(&key);
            }
            self.free.push(id);
        }
    }

    /// `(stop, pass)` of every live node, for resampling the stop prior.
    pub fn stop_pass_counts(&self) -> Vec<(u32, u32)> {
        self.nodes
            .iter()
            .filter(|n| n.live)
            .map(|n| (n.stop, n.pass))
            .collect()
    }

    /// Resample `theta`/`d` of every depth from the current seating.
    pub fn sample_hyperparameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let _span = debug_span!("hpylm_hyper", max_depth = self.max_depth).entered();
        let mut by_depth: Vec<Vec<&Restaurant>> = vec![Vec::new(); self.max_depth + 1];
        for node in self.nodes.iter().filter(|n| n.live) {
            by_depth[node.depth].push(&node.restaurant);
        }
        let mut updated = Vec::with_capacity(by_depth.len());
        for (k, rsts) in by_depth.into_iter().enumerate() {
            updated.push(hyper::sample_theta_d(
                self.theta[k],
                self.d[k],
                self.priors[k],
                rsts,
                rng,
            ));
        }
        for (k, (theta, d)) in updated.into_iter().enumerate() {
            self.theta[k] = theta;
            self.d[k] = d;
        }
    }

    fn context_of(&self, mut id: NodeId) -> Vec<Token> {
        let mut ctx = Vec::with_capacity(self.nodes[id].depth);
        while let (Some(parent), Some(key)) = (self.nodes[id].parent, &self.nodes[id].key) {
            ctx.push(key.clone());
            id = parent;
        }
        ctx
    }

    /// Verify the hierarchical seating invariants over the whole tree.
    pub fn check(&self) -> Result<()> {
        for (id, node) in self.nodes.iter().enumerate().filter(|(_, n)| n.live) {
            node.restaurant.check()?;
            if id != ROOT && node.is_prunable() {
                return Err(SegError::Consistency(format!(
                    "empty node {} was not pruned",
                    display_context(&self.context_of(id))
                )));
            }
            let mut child_tables: HashMap<&Token, u32> = HashMap::new();
            for &child in node.children.values() {
                for (dish, tables) in self.nodes[child].restaurant.dishes() {
                    *child_tables.entry(dish).or_default() += tables.len() as u32;
                }
            }
            for (dish, tables) in child_tables {
                if node.restaurant.customers_of(dish) < tables {
                    return Err(SegError::Consistency(format!(
                        "dish {dish} at {} has fewer customers than child tables",
                        display_context(&self.context_of(id))
                    )));
                }
            }
        }
        Ok(())
    }

    /// Flatten into a record sorted by context path.
    pub fn to_record(&self) -> HpylmRecord {
        let mut nodes: Vec<NodeRecord> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.live)
            .map(|(id, n)| {
                let mut dishes: Vec<DishRecord> = n
                    .restaurant
                    .dishes()
                    .map(|(dish, tables)| DishRecord {
                        dish: dish.clone(),
                        tables: tables.to_vec(),
                    })
                    .collect();
                dishes.sort_by(|a, b| a.dish.cmp(&b.dish));
                NodeRecord {
                    context: self.context_of(id),
                    stop: n.stop,
                    pass: n.pass,
                    dishes,
                }
            })
            .collect();
        nodes.sort_by(|a, b| {
            a.context
                .len()
                .cmp(&b.context.len())
                .then_with(|| a.context.cmp(&b.context))
        });
        HpylmRecord {
            max_depth: self.max_depth,
            theta: self.theta.clone(),
            d: self.d.clone(),
            gamma_a: self.priors.iter().map(|p| p.gamma_a).collect(),
            gamma_b: self.priors.iter().map(|p| p.gamma_b).collect(),
            beta_a: self.priors.iter().map(|p| p.beta_a).collect(),
            beta_b: self.priors.iter().map(|p| p.beta_b).collect(),
            nodes,
        }
    }

    /// Rebuild directly from stored counts. Fails on anything that would
    /// break the seating invariants.
    pub fn from_record(record: HpylmRecord) -> Result<Self> {
        let depths = record.max_depth + 1;
        let lens = [
            record.theta.len(),
            record.d.len(),
            record.gamma_a.len(),
            record.gamma_b.len(),
            record.beta_a.len(),
            record.beta_b.len(),
        ];
        if lens.iter().any(|&l| l != depths) {
            return Err(SegError::Persistence(format!(
                "hyperparameter arrays must have {depths} entries"
            )));
        }
        if record.theta.iter().any(|&t| !(t > 0.0))
            || record.d.iter().any(|&d| !(d > 0.0 && d < 1.0))
        {
            return Err(SegError::Persistence("theta/d out of range".into()));
        }
        let priors = (0..depths)
            .map(|k| DepthPrior {
                gamma_a: record.gamma_a[k],
                gamma_b: record.gamma_b[k],
                beta_a: record.beta_a[k],
                beta_b: record.beta_b[k],
            })
            .collect();
        let mut hpylm = Hpylm {
            nodes: vec![Node {
                live: true,
                ..Node::default()
            }],
            free: Vec::new(),
            max_depth: record.max_depth,
            theta: record.theta,
            d: record.d,
            priors,
        };

        let mut records = record.nodes;
        records.sort_by_key(|r| r.context.len());
        let mut seen_root = false;
        for rec in records {
            if rec.context.len() > hpylm.max_depth {
                return Err(SegError::Persistence(format!(
                    "node {} deeper than max depth {}",
                    display_context(&rec.context),
                    hpylm.max_depth
                )));
            }
            let id = match rec.context.split_first() {
                None => {
                    if seen_root {
                        return Err(SegError::Persistence("root stored twice".into()));
                    }
                    seen_root = true;
                    ROOT
                }
                Some((oldest, parent_ctx)) => {
                    let path = hpylm.existing_path(parent_ctx);
                    if path.len() != parent_ctx.len() + 1 {
                        return Err(SegError::Persistence(format!(
                            "node {} stored without its parent",
                            display_context(&rec.context)
                        )));
                    }
                    let parent = path[path.len() - 1];
                    if hpylm.child(parent, oldest).is_some() {
                        return Err(SegError::Persistence(format!(
                            "node {} stored twice",
                            display_context(&rec.context)
                        )));
                    }
                    hpylm.alloc(parent, oldest.clone())
                }
            };
            let node = &mut hpylm.nodes[id];
            node.restaurant =
                Restaurant::from_tables(rec.dishes.into_iter().map(|d| (d.dish, d.tables)))?;
            node.stop = rec.stop;
            node.pass = rec.pass;
        }
        hpylm
            .check()
            .map_err(|e| SegError::Persistence(e.to_string()))?;
        Ok(hpylm)
    }
}

fn display_context(context: &[Token]) -> String {
    let parts: Vec<String> = context.iter().map(|t| t.to_string()).collect();
    format!("[{}]", parts.join(" "))
}

/// Serialized form of one [`Hpylm`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpylmRecord {
    pub max_depth: usize,
    pub theta: Vec<f64>,
    pub d: Vec<f64>,
    pub gamma_a: Vec<f64>,
    pub gamma_b: Vec<f64>,
    pub beta_a: Vec<f64>,
    pub beta_b: Vec<f64>,
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Oldest to newest.
    pub context: Vec<Token>,
    pub stop: u32,
    pub pass: u32,
    pub dishes: Vec<DishRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishRecord {
    pub dish: Token,
    pub tables: Vec<u32>,
}
