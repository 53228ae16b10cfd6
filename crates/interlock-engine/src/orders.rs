//! Order rows and the pending queue tables.

use bytes::{Buf, BufMut};
use interlock_common::{DateTime, Id, Result, Station, StorageConfig, TrainName};
use interlock_storage::{BPlusTree, Handle, Record};
use std::fmt;

use crate::catalog::TrainDay;

/// Key of a queued purchase: the train run it waits on, then the
/// operation timestamp. Key order over the second component is exactly
/// the FIFO promotion order.
pub type PendingKey = (TrainDay, i32);

/// Lifecycle of an order. Only this field of an order ever changes after
/// insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Success,
    Pending,
    Refunded,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderStatus::Success => "[success]",
            OrderStatus::Pending => "[pending]",
            OrderStatus::Refunded => "[refunded]",
        })
    }
}

impl Record for OrderStatus {
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(match self {
            OrderStatus::Success => 0,
            OrderStatus::Pending => 1,
            OrderStatus::Refunded => 2,
        });
    }

    fn decode(buf: &mut impl Buf) -> Self {
        match buf.get_u8() {
            1 => OrderStatus::Pending,
            2 => OrderStatus::Refunded,
            _ => OrderStatus::Success,
        }
    }
}

/// One purchase, appended per user and keyed `(user, order index)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub status: OrderStatus,
    pub train: TrainName,
    pub from: Station,
    pub to: Station,
    pub leave: DateTime,
    pub arrive: DateTime,
    pub price: i32,
    pub ticket_count: i32,
    /// Boarding and alighting station indexes on the train's route.
    pub from_index: i32,
    pub to_index: i32,
    /// Where this order sits (or sat) in the pending queue.
    pub pending_key: PendingKey,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} -> {} {} {} {}",
            self.status,
            self.train,
            self.from,
            self.leave,
            self.to,
            self.arrive,
            self.price,
            self.ticket_count
        )
    }
}

impl Record for Order {
    const SIZE: usize = OrderStatus::SIZE
        + TrainName::SIZE
        + 2 * Station::SIZE
        + 2 * DateTime::SIZE
        + 4 * 4
        + PendingKey::SIZE;

    fn encode(&self, buf: &mut impl BufMut) {
        self.status.encode(buf);
        self.train.encode(buf);
        self.from.encode(buf);
        self.to.encode(buf);
        self.leave.encode(buf);
        self.arrive.encode(buf);
        buf.put_i32_le(self.price);
        buf.put_i32_le(self.ticket_count);
        buf.put_i32_le(self.from_index);
        buf.put_i32_le(self.to_index);
        self.pending_key.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        Self {
            status: OrderStatus::decode(buf),
            train: TrainName::decode(buf),
            from: Station::decode(buf),
            to: Station::decode(buf),
            leave: DateTime::decode(buf),
            arrive: DateTime::decode(buf),
            price: buf.get_i32_le(),
            ticket_count: buf.get_i32_le(),
            from_index: buf.get_i32_le(),
            to_index: buf.get_i32_le(),
            pending_key: PendingKey::decode(buf),
        }
    }
}

/// A queued purchase, pointing back at its order row for O(1) rewrite on
/// promotion.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub handle: Handle,
    pub from_index: i32,
    pub to_index: i32,
    pub ticket_count: i32,
}

impl Record for PendingOrder {
    const SIZE: usize = Handle::SIZE + 3 * 4;

    fn encode(&self, buf: &mut impl BufMut) {
        self.handle.encode(buf);
        buf.put_i32_le(self.from_index);
        buf.put_i32_le(self.to_index);
        buf.put_i32_le(self.ticket_count);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        Self {
            handle: Handle::decode(buf),
            from_index: buf.get_i32_le(),
            to_index: buf.get_i32_le(),
            ticket_count: buf.get_i32_le(),
        }
    }
}

/// The order tables: per-user order log, per-user order counter, and the
/// per-run pending queue.
pub struct OrderLedger {
    pub(crate) orders: BPlusTree<(Id, i32), Order>,
    pub(crate) order_counts: BPlusTree<Id, i32>,
    pub(crate) pending: BPlusTree<PendingKey, PendingOrder>,
}

impl OrderLedger {
    pub fn open(config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            orders: BPlusTree::open(config, "orders")?,
            order_counts: BPlusTree::open(config, "orderNumber")?,
            pending: BPlusTree::open(config, "ordersPending")?,
        })
    }

    /// Appends an order under the user's next index, returning the row
    /// handle and the index used.
    pub fn append(&self, uid: Id, order: &Order) -> Result<(Handle, i32)> {
        let index = self.order_counts.get_or_default(&uid)?;
        if index > 0 {
            self.order_counts.set(&uid, &(index + 1))?;
        } else {
            self.order_counts.insert(uid, &(index + 1))?;
        }
        let handle = self.orders.insert((uid, index), order)?;
        Ok((handle, index))
    }

    /// A user's orders, most recent first.
    pub fn orders_of(&self, uid: Id) -> Result<Vec<Order>> {
        let entries = self.orders.scan_range(&(uid, 0), &(uid, i32::MAX))?;
        let mut orders = Vec::with_capacity(entries.len());
        for entry in entries.into_iter().rev() {
            orders.push(self.orders.get_by_handle(entry.handle)?);
        }
        Ok(orders)
    }

    /// Truncates all three tables.
    pub fn clean(&self) -> Result<()> {
        self.orders.clear()?;
        self.order_counts.clear()?;
        self.pending.clear()
    }
}
