//! A single Pitman-Yor restaurant (Chinese Restaurant Process node).

use std::collections::HashMap;

use rand::Rng;

use crate::error::{Result, SegError};
use crate::token::Token;

#[derive(Debug, Clone, Default, PartialEq)]
struct Dish {
    /// Customers per table, every entry > 0.
    tables: Vec<u32>,
    customers: u32,
}

/// Seating arrangement for one context.
///
/// Counts are kept per dish together with restaurant-wide totals so that the
/// predictive probability is O(1) per lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Restaurant {
    dishes: HashMap<Token, Dish>,
    total_customers: u32,
    total_tables: u32,
}

impl Restaurant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.total_customers == 0
    }

    pub fn total_customers(&self) -> u32 {
        self.total_customers
    }

    pub fn total_tables(&self) -> u32 {
        self.total_tables
    }

    pub fn customers_of(&self, dish: &Token) -> u32 {
        self.dishes.get(dish).map_or(0, |d| d.customers)
    }

    pub fn tables_of(&self, dish: &Token) -> u32 {
        self.dishes.get(dish).map_or(0, |d| d.tables.len() as u32)
    }

    /// Seated dishes with their per-table customer counts, in arbitrary order.
    pub fn dishes(&self) -> impl Iterator<Item = (&Token, &[u32])> {
        self.dishes.iter().map(|(k, v)| (k, v.tables.as_slice()))
    }

    /// Split the predictive probability into `(body, coef)` so that
    /// `P(dish) = body + coef * P_parent(dish)`.
    ///
    /// An empty restaurant passes the parent distribution through unchanged.
    pub fn predictive_parts(&self, dish: &Token, theta: f64, d: f64) -> (f64, f64) {
        if self.total_customers == 0 {
            return (0.0, 1.0);
        }
        let denom = theta + self.total_customers as f64;
        let body = match self.dishes.get(dish) {
            Some(e) => (e.customers as f64 - d * e.tables.len() as f64).max(0.0) / denom,
            None => 0.0,
        };
        let coef = (theta + d * self.total_tables as f64) / denom;
        (body, coef)
    }

    /// Pitman-Yor predictive probability of `dish` given the parent (or base)
    /// probability of the same dish.
    pub fn probability(&self, dish: &Token, parent: f64, theta: f64, d: f64) -> f64 {
        let (body, coef) = self.predictive_parts(dish, theta, d);
        body + coef * parent
    }

    /// Seat one customer eating `dish`. Returns `true` when a new table was
    /// opened, in which case the caller must send a proxy customer to the
    /// parent restaurant.
    pub fn add_customer<R: Rng + ?Sized>(
        &mut self,
        dish: &Token,
        parent: f64,
        theta: f64,
        d: f64,
        rng: &mut R,
    ) -> bool {
        self.total_customers += 1;
        let total_tables = self.total_tables;
        let entry = self.dishes.entry(dish.clone()).or_default();
        entry.customers += 1;

        let new_weight = (theta + d * total_tables as f64) * parent;
        let existing: f64 = entry.tables.iter().map(|&c| (c as f64 - d).max(0.0)).sum();
        let total = existing + new_weight;

        let mut chosen = None;
        if !entry.tables.is_empty() && total > 0.0 && total.is_finite() {
            let mut r = rng.gen::<f64>() * total;
            for (k, &c) in entry.tables.iter().enumerate() {
                r -= (c as f64 - d).max(0.0);
                if r < 0.0 {
                    chosen = Some(k);
                    break;
                }
            }
        }

        match chosen {
            Some(k) => {
                entry.tables[k] += 1;
                false
            }
            None => {
                entry.tables.push(1);
                self.total_tables += 1;
                true
            }
        }
    }

    /// Remove one customer eating `dish`, choosing the table proportionally to
    /// its occupancy. Returns `(table_removed, dish_removed)`.
    pub fn remove_customer<R: Rng + ?Sized>(
        &mut self,
        dish: &Token,
        rng: &mut R,
    ) -> Result<(bool, bool)> {
        let entry = self.dishes.get_mut(dish).ok_or_else(|| {
            SegError::Consistency(format!("removing unseated dish {dish}"))
        })?;
        if entry.customers == 0 || entry.tables.is_empty() {
            return Err(SegError::Consistency(format!(
                "dish {dish} has no customers to remove"
            )));
        }

        let mut r = rng.gen_range(0..entry.customers);
        let mut k = entry.tables.len() - 1;
        for (i, &c) in entry.tables.iter().enumerate() {
            if r < c {
                k = i;
                break;
            }
            r -= c;
        }

        entry.tables[k] -= 1;
        entry.customers -= 1;
        self.total_customers -= 1;

        let mut table_removed = false;
        if entry.tables[k] == 0 {
            entry.tables.remove(k);
            self.total_tables -= 1;
            table_removed = true;
        }
        let dish_removed = entry.tables.is_empty();
        if dish_removed {
            self.dishes.remove(dish);
        }
        Ok((table_removed, dish_removed))
    }

    /// Rebuild a restaurant directly from stored table counts.
    pub fn from_tables<I>(dishes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Token, Vec<u32>)>,
    {
        let mut rst = Restaurant::new();
        for (dish, tables) in dishes {
            if tables.is_empty() || tables.contains(&0) {
                return Err(SegError::Persistence(format!(
                    "dish {dish} has an empty table list or a zero-customer table"
                )));
            }
            let customers: u32 = tables.iter().sum();
            rst.total_customers += customers;
            rst.total_tables += tables.len() as u32;
            if rst.dishes.insert(dish.clone(), Dish { tables, customers }).is_some() {
                return Err(SegError::Persistence(format!("dish {dish} stored twice")));
            }
        }
        Ok(rst)
    }

    /// Recompute totals from the per-table counts and compare with the caches.
    pub fn check(&self) -> Result<()> {
        let mut customers = 0u32;
        let mut tables = 0u32;
        for (dish, e) in &self.dishes {
            let sum: u32 = e.tables.iter().sum();
            if sum != e.customers || e.tables.is_empty() || e.tables.contains(&0) {
                return Err(SegError::Consistency(format!(
                    "table counts for {dish} do not add up"
                )));
            }
            customers += sum;
            tables += e.tables.len() as u32;
        }
        if customers != self.total_customers || tables != self.total_tables {
            return Err(SegError::Consistency("restaurant totals out of sync".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn a() -> Token {
        Token::Char('a')
    }

    #[test]
    fn test_first_customer_opens_table() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut rst = Restaurant::new();
        assert!(rst.add_customer(&a(), 0.5, 1.0, 0.5, &mut rng));
        assert_eq!(rst.total_customers(), 1);
        assert_eq!(rst.total_tables(), 1);
        assert_eq!(rst.tables_of(&a()), 1);
    }

    #[test]
    fn test_zero_parent_joins_existing_table() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut rst = Restaurant::new();
        rst.add_customer(&a(), 0.5, 1.0, 0.5, &mut rng);
        for _ in 0..20 {
            assert!(!rst.add_customer(&a(), 0.0, 1.0, 0.5, &mut rng));
        }
        assert_eq!(rst.tables_of(&a()), 1);
        assert_eq!(rst.customers_of(&a()), 21);
    }

    #[test]
    fn test_empty_restaurant_passes_parent_through() {
        let rst = Restaurant::new();
        assert_eq!(rst.probability(&a(), 0.25, 1.0, 0.5), 0.25);
    }

    #[test]
    fn test_predictive_probability() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut rst = Restaurant::new();
        rst.add_customer(&a(), 1.0, 1.0, 0.5, &mut rng);
        // c=1, t=1, T=1: (1 - 0.5)/(1 + 1) + (1 + 0.5)/(1 + 1) * 0.1
        let p = rst.probability(&a(), 0.1, 1.0, 0.5);
        assert!((p - (0.25 + 0.75 * 0.1)).abs() < 1e-12);
        // unseen dish only gets the smoothing mass
        let q = rst.probability(&Token::Char('b'), 0.1, 1.0, 0.5);
        assert!((q - 0.75 * 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_remove_last_customer_drops_dish() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut rst = Restaurant::new();
        rst.add_customer(&a(), 0.5, 1.0, 0.5, &mut rng);
        let (table_removed, dish_removed) = rst.remove_customer(&a(), &mut rng).unwrap();
        assert!(table_removed);
        assert!(dish_removed);
        assert!(rst.is_empty());
        assert_eq!(rst.total_tables(), 0);
    }

    #[test]
    fn test_remove_unseated_is_consistency_error() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut rst = Restaurant::new();
        let err = rst.remove_customer(&a(), &mut rng).unwrap_err();
        assert!(matches!(err, SegError::Consistency(_)));
    }

    #[test]
    fn test_from_tables_rejects_zero_table() {
        assert!(Restaurant::from_tables(vec![(a(), vec![2, 0])]).is_err());
        let rst = Restaurant::from_tables(vec![(a(), vec![2, 1])]).unwrap();
        assert_eq!(rst.total_customers(), 3);
        assert_eq!(rst.total_tables(), 2);
        rst.check().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8, f64),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 0.0f64..1.0).prop_map(|(d, p)| Op::Add(d, p)),
            (0u8..4).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_customer_counts_track_net_calls(
            ops in prop::collection::vec(op(), 1..200),
            seed in any::<u64>(),
            d in 0.01f64..0.99,
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut rst = Restaurant::new();
            let mut net = [0u32; 4];
            for op in ops {
                match op {
                    Op::Add(i, p) => {
                        rst.add_customer(&Token::tag(i as usize), p, 1.0, d, &mut rng);
                        net[i as usize] += 1;
                    }
                    Op::Remove(i) => {
                        let res = rst.remove_customer(&Token::tag(i as usize), &mut rng);
                        if net[i as usize] == 0 {
                            prop_assert!(res.is_err());
                        } else {
                            net[i as usize] -= 1;
                            let (_, dish_removed) = res.unwrap();
                            prop_assert_eq!(dish_removed, net[i as usize] == 0);
                        }
                    }
                }
                prop_assert_eq!(rst.total_customers(), net.iter().sum::<u32>());
                for (i, &n) in net.iter().enumerate() {
                    prop_assert_eq!(rst.customers_of(&Token::tag(i)), n);
                    prop_assert!(rst.tables_of(&Token::tag(i)) <= n);
                }
                prop_assert!(rst.check().is_ok());
            }
        }
    }
}
