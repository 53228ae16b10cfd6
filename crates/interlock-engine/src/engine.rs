//! The reservation engine facade.
//!
//! Composes the user directory, the train catalog, and the order ledger,
//! and implements the operations that span them: buying, refunding with
//! FIFO pending promotion, and the per-user order listing.

use interlock_common::{Date, DateTime, EngineConfig, InterlockError, Result, Station, TrainName, Username};
use tracing::debug;

use crate::catalog::TrainCatalog;
use crate::orders::{Order, OrderLedger, OrderStatus, PendingOrder};
use crate::users::UserDirectory;

/// Result of a purchase attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyOutcome {
    /// Seats were available; carries the total price.
    Booked(i64),
    /// Queued behind earlier requests for the same run.
    Queued,
}

/// The whole reservation system.
pub struct Engine {
    pub users: UserDirectory,
    pub catalog: TrainCatalog,
    pub ledger: OrderLedger,
}

impl Engine {
    pub fn open(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            users: UserDirectory::open(&config.storage)?,
            catalog: TrainCatalog::open(&config.storage)?,
            ledger: OrderLedger::open(&config.storage)?,
        })
    }

    /// Attempts to buy `count` tickets from `from` to `to`, boarding on
    /// `date`. When the run lacks seats and `queue_allowed` is set, the
    /// order is recorded pending under the operation timestamp.
    #[allow(clippy::too_many_arguments)]
    pub fn buy_ticket(
        &mut self,
        user: &Username,
        train: &TrainName,
        date: Date,
        count: i32,
        from: &Station,
        to: &Station,
        queue_allowed: bool,
        op_time: i32,
    ) -> Result<BuyOutcome> {
        let uid = user.id();
        let tid = train.id();
        if !self.users.session.is_logged_in(uid) {
            return Err(InterlockError::NotLoggedIn);
        }
        let info = self.catalog.trains.get(&tid)?;
        if !info.released {
            return Err(InterlockError::NotReleased);
        }
        if count > info.seat_count {
            return Err(InterlockError::CapacityExceeded);
        }
        let (l, r) = match info.segment_of(from, to) {
            (Some(l), Some(r)) if l < r => (l, r),
            _ => return Err(InterlockError::invalid("bad boarding stations")),
        };
        let start = info.virtual_start_date(date, l);
        if info.invalid_date(start) {
            return Err(InterlockError::invalid("date outside sale window"));
        }
        let train_day = (tid, start.days_since(info.date0));
        let seat_handle = self
            .catalog
            .seats
            .find(&train_day)?
            .ok_or(InterlockError::NotFound)?;
        let mut seats = self.catalog.seats.get_by_handle(seat_handle)?;
        let available = seats.min(l, r);
        let price = info.total_price(l, r);
        if available < count && !queue_allowed {
            return Err(InterlockError::SoldOut);
        }
        let status = if available < count {
            OrderStatus::Pending
        } else {
            OrderStatus::Success
        };
        let order = Order {
            status,
            train: *train,
            from: *from,
            to: *to,
            leave: DateTime::new(start, info.leave[l]),
            arrive: DateTime::new(start, info.arrive[r]),
            price,
            ticket_count: count,
            from_index: l as i32,
            to_index: r as i32,
            pending_key: (train_day, op_time),
        };
        let (handle, index) = self.ledger.append(uid, &order)?;
        debug!(user = %user, train = %train, index, ?status, "order recorded");
        if status == OrderStatus::Success {
            seats.add(l, r, -count);
            self.catalog.seats.set_by_handle(seat_handle, &seats)?;
            Ok(BuyOutcome::Booked(price as i64 * count as i64))
        } else {
            self.ledger.pending.insert(
                order.pending_key,
                &PendingOrder {
                    handle,
                    from_index: l as i32,
                    to_index: r as i32,
                    ticket_count: count,
                },
            )?;
            Ok(BuyOutcome::Queued)
        }
    }

    /// The user's orders, most recent first.
    pub fn query_order(&mut self, user: &Username) -> Result<Vec<Order>> {
        let uid = user.id();
        if !self.users.session.is_logged_in(uid) {
            return Err(InterlockError::NotLoggedIn);
        }
        self.ledger.orders_of(uid)
    }

    /// Refunds the user's `k`-th most recent order.
    ///
    /// Refunding a successful order returns its seats and then walks the
    /// run's pending queue in submission order, promoting every entry
    /// that now fits; entries that do not fit stay queued in place.
    /// Refunding a pending order just leaves the queue.
    pub fn refund_ticket(&mut self, user: &Username, k: i32) -> Result<()> {
        let uid = user.id();
        if !self.users.session.is_logged_in(uid) {
            return Err(InterlockError::NotLoggedIn);
        }
        let index = self.ledger.order_counts.get_or_default(&uid)? - k;
        if index < 0 {
            return Err(InterlockError::NotFound);
        }
        let order_handle = self
            .ledger
            .orders
            .find(&(uid, index))?
            .ok_or(InterlockError::NotFound)?;
        let mut order = self.ledger.orders.get_by_handle(order_handle)?;
        if order.status == OrderStatus::Refunded {
            return Err(InterlockError::AlreadyRefunded);
        }
        let train_day = order.pending_key.0;
        if order.status == OrderStatus::Success {
            let seat_handle = self
                .catalog
                .seats
                .find(&train_day)?
                .ok_or(InterlockError::NotFound)?;
            let mut seats = self.catalog.seats.get_by_handle(seat_handle)?;
            seats.add(
                order.from_index as usize,
                order.to_index as usize,
                order.ticket_count,
            );

            // Promote in ascending op_time. The range is snapshotted
            // before any erase so the walk stays stable.
            let queue = self
                .ledger
                .pending
                .scan_range(&(train_day, 0), &(train_day, i32::MAX))?;
            let mut promoted = 0;
            for entry in queue {
                let pd = self.ledger.pending.get_by_handle(entry.handle)?;
                let (l, r) = (pd.from_index as usize, pd.to_index as usize);
                if seats.min(l, r) >= pd.ticket_count {
                    seats.add(l, r, -pd.ticket_count);
                    let mut waiting = self.ledger.orders.get_by_handle(pd.handle)?;
                    waiting.status = OrderStatus::Success;
                    self.ledger.orders.set_by_handle(pd.handle, &waiting)?;
                    self.ledger.pending.erase(&entry.key)?;
                    promoted += 1;
                }
            }
            self.catalog.seats.set_by_handle(seat_handle, &seats)?;
            debug!(user = %user, index, promoted, "refunded successful order");
        } else {
            self.ledger.pending.erase(&order.pending_key)?;
            debug!(user = %user, index, "refunded pending order");
        }
        order.status = OrderStatus::Refunded;
        self.ledger.orders.set_by_handle(order_handle, &order)
    }

    /// Truncates every table and the session layer.
    pub fn clean(&mut self) -> Result<()> {
        self.users.clean()?;
        self.catalog.clean()?;
        self.ledger.clean()
    }
}
