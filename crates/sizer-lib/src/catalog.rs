//! Tier catalog: the discrete capacity/price ladder
//!
//! Loaded once at startup and immutable afterwards. Positions are strictly
//! increasing and both capacity and price must increase with position;
//! maximum storage may plateau (several tiers can share a storage limit).

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// One rung of the ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// Ladder position, strictly increasing.
    pub position: u32,
    pub name: String,
    /// Abstract throughput allowance.
    pub capacity: u32,
    pub price_monthly: f64,
    /// Largest stored-data size the tier supports.
    pub max_storage: u64,
}

/// Validated, ordered tier ladder.
#[derive(Debug, Clone)]
pub struct TierCatalog {
    tiers: Vec<Tier>,
}

impl TierCatalog {
    /// Build a catalog, rejecting empty, duplicated, or non-monotonic input.
    pub fn new(mut tiers: Vec<Tier>) -> Result<Self, CatalogError> {
        if tiers.is_empty() {
            return Err(CatalogError::EmptyLadder);
        }
        tiers.sort_by_key(|t| t.position);

        for pair in tiers.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            if lo.position == hi.position {
                return Err(CatalogError::DuplicatePosition {
                    position: hi.position,
                });
            }
            if hi.capacity <= lo.capacity {
                return Err(CatalogError::NotMonotonic {
                    field: "capacity",
                    position: hi.position,
                });
            }
            if hi.price_monthly <= lo.price_monthly {
                return Err(CatalogError::NotMonotonic {
                    field: "price",
                    position: hi.position,
                });
            }
        }

        for (i, tier) in tiers.iter().enumerate() {
            if tiers[..i].iter().any(|t| t.name == tier.name) {
                return Err(CatalogError::DuplicateName {
                    name: tier.name.clone(),
                });
            }
        }

        Ok(Self { tiers })
    }

    /// Parse a ladder from a JSON array of tiers.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let tiers: Vec<Tier> = serde_json::from_str(json).map_err(|e| {
            CatalogError::UnknownTier {
                name: format!("unparseable ladder: {e}"),
            }
        })?;
        Self::new(tiers)
    }

    /// The built-in ladder used when no external one is configured.
    pub fn builtin() -> Self {
        let tiers = vec![
            tier(0, "B", 5, 5.0, 2),
            tier(1, "S0", 10, 15.0, 250),
            tier(2, "S1", 20, 30.0, 250),
            tier(3, "S2", 50, 75.0, 250),
            tier(4, "S3", 100, 150.0, 1024),
            tier(5, "P1", 125, 465.0, 1024),
            tier(6, "P2", 250, 930.0, 1024),
            tier(7, "P4", 500, 1860.0, 1024),
        ];
        Self::new(tiers).expect("builtin ladder is valid")
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Tiers in ladder order.
    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter()
    }

    /// Cheapest tier on the ladder.
    pub fn floor(&self) -> &Tier {
        &self.tiers[0]
    }

    /// Most expensive tier on the ladder.
    pub fn top(&self) -> &Tier {
        &self.tiers[self.tiers.len() - 1]
    }

    pub fn by_name(&self, name: &str) -> Result<&Tier, CatalogError> {
        self.tiers
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| CatalogError::UnknownTier {
                name: name.to_string(),
            })
    }

    pub fn by_position(&self, position: u32) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.position == position)
    }

    /// Lowest-priced tier providing at least `capacity` units. Because the
    /// ladder is monotonic this is also the lowest adequate rung. `None`
    /// when the ladder tops out below the asked capacity.
    pub fn smallest_covering_capacity(&self, capacity: f64) -> Option<&Tier> {
        self.tiers.iter().find(|t| f64::from(t.capacity) >= capacity)
    }

    /// Cheapest tier whose storage limit covers `storage_used` and whose
    /// price stays strictly below `price_below`.
    pub fn cheapest_covering_storage(&self, storage_used: u64, price_below: f64) -> Option<&Tier> {
        self.tiers
            .iter()
            .find(|t| t.max_storage >= storage_used && t.price_monthly < price_below)
    }

    /// Tiers strictly above `position`, ascending. Feeds the upward
    /// fallback search after a size rejection.
    pub fn above(&self, position: u32) -> impl Iterator<Item = &Tier> {
        self.tiers.iter().filter(move |t| t.position > position)
    }
}

fn tier(position: u32, name: &str, capacity: u32, price_monthly: f64, max_storage: u64) -> Tier {
    Tier {
        position,
        name: name.to_string(),
        capacity,
        price_monthly,
        max_storage,
    }
}
