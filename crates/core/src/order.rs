use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::money::Milliunits;

/// A normalized record of a single merchant purchase derived from one email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Calendar day the email was received; time-of-day is discarded.
    pub date: NaiveDate,
    /// Negative for a purchase (debit).
    pub amount: Milliunits,
    /// Item titles, already display-truncated.
    pub items: Vec<String>,
    /// Identifier of the originating message.
    pub source_ref: String,
}

/// Bounded, insertion-ordered store of recently extracted orders.
/// Once `capacity` is exceeded the oldest entries are dropped, keeping the
/// most recently seen orders.
#[derive(Debug)]
pub struct OrderHistory {
    orders: VecDeque<Order>,
    capacity: usize,
}

impl OrderHistory {
    pub fn new(capacity: usize) -> Self {
        OrderHistory { orders: VecDeque::new(), capacity }
    }

    /// Append an order, evicting from the front when over capacity.
    /// Returns how many orders were evicted.
    pub fn push(&mut self, order: Order) -> usize {
        self.orders.push_back(order);
        let mut evicted = 0;
        while self.orders.len() > self.capacity {
            self.orders.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn get(&self, index: usize) -> Option<&Order> {
        self.orders.get(index)
    }

    pub fn first(&self) -> Option<&Order> {
        self.orders.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(day: u32, cents: i64) -> Order {
        Order {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            amount: Milliunits::new(-cents * 10),
            items: vec!["Widget".to_string()],
            source_ref: format!("msg-{day}"),
        }
    }

    #[test]
    fn push_keeps_insertion_order() {
        use chrono::Datelike;
        let mut history = OrderHistory::new(10);
        history.push(order(1, 100));
        history.push(order(2, 200));
        let days: Vec<u32> = history.iter().map(|o| o.date.day()).collect();
        assert_eq!(days, vec![1, 2]);
    }

    #[test]
    fn overflow_drops_oldest_first() {
        use chrono::Datelike;
        let mut history = OrderHistory::new(3);
        let mut evicted = 0;
        for day in 1..=8 {
            evicted += history.push(order(day, 100));
        }
        assert_eq!(evicted, 5);
        assert_eq!(history.len(), 3);
        // Only the most recent three survive, oldest-first order preserved.
        let days: Vec<u32> = history.iter().map(|o| o.date.day()).collect();
        assert_eq!(days, vec![6, 7, 8]);
    }

    #[test]
    fn first_is_earliest_surviving_order() {
        let mut history = OrderHistory::new(2);
        history.push(order(1, 100));
        history.push(order(2, 200));
        history.push(order(3, 300));
        assert_eq!(history.first().unwrap().source_ref, "msg-2");
    }

    #[test]
    fn get_by_index() {
        let mut history = OrderHistory::new(5);
        history.push(order(1, 100));
        assert!(history.get(0).is_some());
        assert!(history.get(1).is_none());
    }
}
