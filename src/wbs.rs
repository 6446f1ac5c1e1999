//! Budget work-breakdown tree building and renumbering.
//!
//! Budget lines arrive as a flat parent-linked list. The tree builder
//! groups them, sorts siblings by their existing numbering, and rolls
//! totals up: any node with children is a pure aggregator — its total
//! is the sum of its children's totals, its quantity is forced to 1,
//! and its unit price equals the total, regardless of values typed
//! directly on the chapter row.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;

/// A flat budget line as stored.
#[derive(Debug, Clone)]
pub struct WbsItem {
    pub id: String,
    pub parent_id: Option<String>,
    pub numbering: String,
    pub item_type: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// A resolved tree node with rolled-up totals.
#[derive(Debug, Clone, Serialize)]
pub struct WbsNode {
    pub id: String,
    pub numbering: String,
    pub item_type: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub children: Vec<WbsNode>,
}

/// Builds the hierarchy from a flat list. Orphans (parent id pointing
/// at nothing in the list) are treated as roots rather than dropped.
pub fn build_hierarchy(items: &[WbsItem]) -> Vec<WbsNode> {
    let ids: HashMap<&str, ()> = items.iter().map(|i| (i.id.as_str(), ())).collect();
    let mut children_map: HashMap<&str, Vec<&WbsItem>> = HashMap::new();
    let mut roots: Vec<&WbsItem> = Vec::new();

    for item in items {
        match item.parent_id.as_deref().filter(|p| ids.contains_key(p)) {
            Some(parent) => children_map.entry(parent).or_default().push(item),
            None => roots.push(item),
        }
    }

    roots.sort_by(|a, b| a.numbering.cmp(&b.numbering));
    roots
        .into_iter()
        .map(|item| build_node(item, &children_map))
        .collect()
}

fn build_node(item: &WbsItem, children_map: &HashMap<&str, Vec<&WbsItem>>) -> WbsNode {
    let mut child_items: Vec<&WbsItem> = children_map
        .get(item.id.as_str())
        .cloned()
        .unwrap_or_default();
    child_items.sort_by(|a, b| a.numbering.cmp(&b.numbering));

    let children: Vec<WbsNode> = child_items
        .into_iter()
        .map(|child| build_node(child, children_map))
        .collect();

    let mut node = WbsNode {
        id: item.id.clone(),
        numbering: item.numbering.clone(),
        item_type: item.item_type.clone(),
        quantity: item.quantity,
        unit_price: item.unit_price,
        total_price: item.total_price,
        children,
    };

    if !node.children.is_empty() {
        let sum: Decimal = node.children.iter().map(|c| c.total_price).sum();
        node.total_price = sum;
        node.unit_price = sum;
        node.quantity = Decimal::ONE;
    }

    node
}

/// Walks root to leaf assigning sequential dotted-decimal labels
/// ("1", "1.1", "1.2", "2", ...). Siblings keep their relative order
/// under a stable lexicographic sort of the existing numbering, so the
/// result is independent of insertion order. Returns id → new label;
/// persisting the update is the caller's job.
pub fn renumber(items: &[WbsItem]) -> HashMap<String, String> {
    let ids: HashMap<&str, ()> = items.iter().map(|i| (i.id.as_str(), ())).collect();
    let mut children_map: HashMap<&str, Vec<&WbsItem>> = HashMap::new();
    let mut roots: Vec<&WbsItem> = Vec::new();

    for item in items {
        match item.parent_id.as_deref().filter(|p| ids.contains_key(p)) {
            Some(parent) => children_map.entry(parent).or_default().push(item),
            None => roots.push(item),
        }
    }

    let mut updates = HashMap::new();
    assign_numbers(&mut roots, "", &children_map, &mut updates);
    updates
}

fn assign_numbers(
    siblings: &mut Vec<&WbsItem>,
    prefix: &str,
    children_map: &HashMap<&str, Vec<&WbsItem>>,
    updates: &mut HashMap<String, String>,
) {
    siblings.sort_by(|a, b| a.numbering.cmp(&b.numbering));
    for (idx, item) in siblings.iter().enumerate() {
        let label = if prefix.is_empty() {
            format!("{}", idx + 1)
        } else {
            format!("{}.{}", prefix, idx + 1)
        };
        updates.insert(item.id.clone(), label.clone());

        if let Some(kids) = children_map.get(item.id.as_str()) {
            let mut kids = kids.clone();
            assign_numbers(&mut kids, &label, children_map, updates);
        }
    }
}
