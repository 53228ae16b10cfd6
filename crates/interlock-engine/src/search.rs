//! Ticket and transfer search over the passby index.

use crate::catalog::{Passby, TrainCatalog};
use interlock_buffer::LinkedHashMap;
use interlock_common::{Date, DateTime, Result, Station, TrainName};
use std::fmt;

/// A purchasable passage on one train.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub train: TrainName,
    pub from: Station,
    pub to: Station,
    pub leave: DateTime,
    pub arrive: DateTime,
    /// Total riding minutes.
    pub time: i32,
    pub price: i32,
    /// Bookable seats, the interval minimum over the covered segments.
    pub seat: i32,
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} -> {} {} {} {}",
            self.train, self.from, self.leave, self.to, self.arrive, self.price, self.seat
        )
    }
}

/// A two-leg journey through one transfer station.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub first: Ticket,
    pub second: Ticket,
    /// Minutes from first departure to final arrival, waits included.
    pub time: i32,
    pub cost: i32,
}

impl Transfer {
    pub fn new(first: Ticket, second: Ticket) -> Self {
        let time = second.arrive.minutes_since(first.leave);
        let cost = first.price + second.price;
        Self {
            first,
            second,
            time,
            cost,
        }
    }
}

/// Orders tickets by the requested criterion; the fixed-width train name
/// breaks ties.
pub fn sort_tickets(tickets: &mut [Ticket], by_cost: bool) {
    if by_cost {
        tickets.sort_by_key(|t| (t.price, t.time, t.train));
    } else {
        tickets.sort_by_key(|t| (t.time, t.price, t.train));
    }
}

/// True when `lhs` is strictly better than `rhs` under the requested
/// criterion.
pub fn transfer_less(lhs: &Transfer, rhs: &Transfer, by_cost: bool) -> bool {
    let key = |t: &Transfer| {
        if by_cost {
            (t.cost, t.time, t.first.train, t.second.train)
        } else {
            (t.time, t.cost, t.first.train, t.second.train)
        }
    };
    key(lhs) < key(rhs)
}

impl TrainCatalog {
    /// All direct tickets from `from` to `to` boarding on `date`,
    /// ordered by the requested criterion.
    ///
    /// Walks the two stations' passby ranges with two pointers,
    /// intersecting by train id (both ranges are sorted by it).
    pub fn query_ticket(
        &self,
        from: &Station,
        to: &Station,
        date: Date,
        by_cost: bool,
    ) -> Result<Vec<Ticket>> {
        let sid = from.id();
        let sid2 = to.id();
        let from_range = self.passby.scan_range(&(sid, 0), &(sid, u64::MAX))?;
        let to_range = self.passby.scan_range(&(sid2, 0), &(sid2, u64::MAX))?;

        let mut tickets = Vec::new();
        let mut j = 0;
        for entry in &from_range {
            let tid = entry.key.1;
            while j < to_range.len() && to_range[j].key.1 < tid {
                j += 1;
            }
            if j == to_range.len() {
                break;
            }
            if to_range[j].key.1 != tid {
                continue;
            }
            let psb = self.passby.get_by_handle(entry.handle)?;
            let psb2 = self.passby.get_by_handle(to_range[j].handle)?;
            let l = psb.index as usize;
            let r = psb2.index as usize;
            if l >= r {
                continue;
            }
            let info = self.trains.get_by_handle(psb.handle)?;
            let start = info.virtual_start_date(date, l);
            if info.invalid_date(start) {
                continue;
            }
            let seats = self.seats.get(&(tid, start.days_since(info.date0)))?;
            tickets.push(Ticket {
                train: psb.train,
                from: *from,
                to: *to,
                leave: DateTime::new(start, info.leave[l]),
                arrive: DateTime::new(start, info.arrive[r]),
                time: info.total_time(l, r),
                price: info.total_price(l, r),
                seat: seats.min(l, r),
            });
        }
        sort_tickets(&mut tickets, by_cost);
        Ok(tickets)
    }

    /// The best two-train journey from `from` to `to` on `date`, if any.
    ///
    /// Outer loop over trains through `from`; for each, a transient map
    /// from its later stations to their index, probed by every candidate
    /// mid-station of every train through `to` (walked right to left).
    /// Seat inventories are only fetched when a candidate beats the
    /// incumbent.
    pub fn query_transfer(
        &self,
        from: &Station,
        to: &Station,
        date: Date,
        by_cost: bool,
    ) -> Result<Option<Transfer>> {
        let sid = from.id();
        let sid2 = to.id();
        let from_range = self.passby.scan_range(&(sid, 0), &(sid, u64::MAX))?;
        let to_passbys = self
            .passby
            .scan_range(&(sid2, 0), &(sid2, u64::MAX))?
            .into_iter()
            .map(|entry| self.passby.get_by_handle(entry.handle))
            .collect::<Result<Vec<Passby>>>()?;

        let mut station_index: LinkedHashMap<Station, usize> = LinkedHashMap::new();
        let mut best: Option<Transfer> = None;
        for entry in &from_range {
            let tid = entry.key.1;
            let psb = self.passby.get_by_handle(entry.handle)?;
            let info = self.trains.get_by_handle(psb.handle)?;
            let l = psb.index as usize;
            let start = info.virtual_start_date(date, l);
            if info.invalid_date(start) {
                continue;
            }
            let leave = DateTime::new(start, info.leave[l]);

            station_index.clear();
            for r in l + 1..info.station_count {
                station_index.insert(info.stations[r], r);
            }

            for psb2 in &to_passbys {
                let r2 = psb2.index as usize;
                let tid2 = psb2.train.id();
                if tid2 == tid {
                    continue;
                }
                let info2 = self.trains.get_by_handle(psb2.handle)?;
                for l2 in (0..r2).rev() {
                    let mid = info2.stations[l2];
                    let Some(&r) = station_index.get(&mid) else {
                        continue;
                    };
                    if l >= r {
                        continue;
                    }
                    let arrive = DateTime::new(start, info.arrive[r]);
                    if DateTime::new(info2.date1, info2.leave[l2]) < arrive {
                        // The second train's last run leaves before we
                        // can reach the transfer station.
                        continue;
                    }
                    // Earliest departure of the second train at or after
                    // our arrival.
                    let earliest = DateTime::new(info2.date0, info2.leave[l2]);
                    let mut leave2 = earliest;
                    let mut start2 = info2.date0;
                    if leave2 < arrive {
                        let date2 = arrive
                            .date
                            .plus_days((leave2.time < arrive.time) as i32);
                        start2 = start2.plus_days(date2.days_since(earliest.date));
                        leave2 = DateTime {
                            date: date2,
                            time: earliest.time,
                        };
                    }
                    let arrive2 = DateTime::new(start2, info2.arrive[r2]);

                    let mut candidate = Transfer::new(
                        Ticket {
                            train: psb.train,
                            from: *from,
                            to: mid,
                            leave,
                            arrive,
                            time: -1,
                            price: info.total_price(l, r),
                            seat: 0,
                        },
                        Ticket {
                            train: psb2.train,
                            from: mid,
                            to: *to,
                            leave: leave2,
                            arrive: arrive2,
                            time: -1,
                            price: info2.total_price(l2, r2),
                            seat: 0,
                        },
                    );
                    let better = match &best {
                        None => true,
                        Some(incumbent) => transfer_less(&candidate, incumbent, by_cost),
                    };
                    if better {
                        let seats = self.seats.get(&(tid, start.days_since(info.date0)))?;
                        let seats2 = self
                            .seats
                            .get(&(tid2, start2.days_since(info2.date0)))?;
                        candidate.first.seat = seats.min(l, r);
                        candidate.second.seat = seats2.min(l2, r2);
                        best = Some(candidate);
                    }
                }
            }
        }
        Ok(best)
    }
}
