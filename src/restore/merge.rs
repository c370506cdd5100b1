//! The k-way merge comparator (spec §4.4): strict weak order by
//! `(tx, txInstant-first, e, a)`.

use std::cmp::Ordering;

use crate::datom::Datom;

/// Compares two datoms for merge order. `tx` ascending; within a `tx`, the
/// `db/txInstant` datom sorts first; otherwise by `e`, then by `a`.
pub fn compare_datoms(a: &Datom, b: &Datom) -> Ordering {
    a.tx.cmp(&b.tx)
        .then_with(|| b.is_tx_instant().cmp(&a.is_tx_instant()))
        .then_with(|| a.e.cmp(&b.e))
        .then_with(|| a.a.cmp(&b.a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datom::Value;

    fn d(e: i64, a: &str, tx: i64) -> Datom {
        Datom::new(e, a, Value::Int(1), tx, true)
    }

    #[test]
    fn orders_by_tx_first() {
        assert_eq!(compare_datoms(&d(1, "x", 1), &d(1, "x", 2)), Ordering::Less);
    }

    #[test]
    fn tx_instant_sorts_first_within_a_tx() {
        let instant = d(5, crate::datom::TX_INSTANT_ATTR, 10);
        let other = d(1, "name", 10);
        assert_eq!(compare_datoms(&instant, &other), Ordering::Less);
        assert_eq!(compare_datoms(&other, &instant), Ordering::Greater);
    }

    #[test]
    fn falls_back_to_entity_then_attribute() {
        assert_eq!(compare_datoms(&d(1, "a", 5), &d(2, "a", 5)), Ordering::Less);
        assert_eq!(compare_datoms(&d(1, "a", 5), &d(1, "b", 5)), Ordering::Less);
        assert_eq!(compare_datoms(&d(1, "a", 5), &d(1, "a", 5)), Ordering::Equal);
    }
}
