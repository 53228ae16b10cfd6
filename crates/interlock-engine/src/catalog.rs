//! Train catalog: schedules, per-run seat inventory, and the station
//! passby index.
//!
//! A train is mutable until released. Release freezes the schedule and
//! fans out one seat row per sale day plus one passby row per station,
//! which is what ticket search and purchase run against.

use bytes::{Buf, BufMut};
use interlock_common::{
    Date, DateTime, Id, InterlockError, Result, Station, StorageConfig, Time, TrainName,
    MINUTES_PER_DAY,
};
use interlock_storage::{BPlusTree, Handle, Record};
use std::fmt;

/// Maximum stations on a route.
pub const MAX_STATIONS: usize = 101;

/// Maximum inter-station segments, one less than stations.
pub const MAX_SEGMENTS: usize = MAX_STATIONS - 1;

/// One run of a train: its id paired with the day offset from `date0`.
pub type TrainDay = (Id, i32);

/// A train schedule row. Immutable once `released` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainInfo {
    pub released: bool,
    /// Train class letter (`G`, `D`, ...).
    pub kind: u8,
    pub station_count: usize,
    pub seat_count: i32,
    pub stations: Vec<Station>,
    /// Cumulative price from the start; `prices[0] == 0`.
    pub prices: Vec<i32>,
    /// First and last sale date of the station-0 departure.
    pub date0: Date,
    pub date1: Date,
    /// Arrival/departure minutes counted from day 0 of the journey;
    /// `arrive[0] == leave[0]` is the start time.
    pub arrive: Vec<i32>,
    pub leave: Vec<i32>,
}

impl TrainInfo {
    /// Builds a schedule from the raw bar-separated command fields.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        station_count: usize,
        seat_count: i32,
        stations_str: &str,
        prices_str: &str,
        start_time: Time,
        travel_times_str: &str,
        stop_times_str: &str,
        sale_date_str: &str,
        kind: u8,
    ) -> Result<Self> {
        if !(2..=MAX_STATIONS).contains(&station_count) {
            return Err(InterlockError::invalid(format!(
                "station count {} out of range",
                station_count
            )));
        }
        if seat_count < 0 {
            return Err(InterlockError::invalid("negative seat count"));
        }

        let stations = stations_str
            .split('|')
            .map(Station::parse)
            .collect::<Result<Vec<_>>>()?;
        if stations.len() != station_count {
            return Err(InterlockError::invalid("station list length mismatch"));
        }

        let legs: Vec<&str> = prices_str.split('|').collect();
        if legs.len() != station_count - 1 {
            return Err(InterlockError::invalid("price list length mismatch"));
        }
        let mut prices = vec![0i32];
        for leg in legs {
            let p: i32 = leg
                .parse()
                .map_err(|_| InterlockError::invalid("bad price"))?;
            prices.push(prices[prices.len() - 1] + p);
        }

        let travels: Vec<&str> = travel_times_str.split('|').collect();
        if travels.len() != station_count - 1 {
            return Err(InterlockError::invalid("travel time list length mismatch"));
        }
        // Stop tokens only exist for intermediate stations; a two-station
        // train passes a `_` placeholder. Anything non-numeric reads as
        // a zero-minute stop.
        let stops: Vec<&str> = stop_times_str.split('|').collect();

        let mut arrive = vec![start_time.minutes];
        let mut leave = vec![start_time.minutes];
        for i in 1..station_count {
            let travel: i32 = travels[i - 1]
                .parse()
                .map_err(|_| InterlockError::invalid("bad travel time"))?;
            let stop: i32 = stops
                .get(i - 1)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            arrive.push(leave[i - 1] + travel);
            leave.push(arrive[i] + stop);
        }

        let (date0_str, date1_str) = sale_date_str
            .split_once('|')
            .ok_or_else(|| InterlockError::invalid("bad sale date range"))?;
        let date0 = Date::parse(date0_str)?;
        let date1 = Date::parse(date1_str)?;

        Ok(Self {
            released: false,
            kind,
            station_count,
            seat_count,
            stations,
            prices,
            date0,
            date1,
            arrive,
            leave,
        })
    }

    /// True when a station-0 departure on `date` is outside the sale
    /// window.
    pub fn invalid_date(&self, date: Date) -> bool {
        date < self.date0 || self.date1 < date
    }

    /// The departure date at station 0 implied by boarding at station
    /// `l` on `date`.
    pub fn virtual_start_date(&self, date: Date, l: usize) -> Date {
        date.minus_days(self.leave[l] / MINUTES_PER_DAY)
    }

    /// Total fare from station `l` to station `r`.
    pub fn total_price(&self, l: usize, r: usize) -> i32 {
        self.prices[r] - self.prices[l]
    }

    /// Minutes riding from station `l` to station `r`.
    pub fn total_time(&self, l: usize, r: usize) -> i32 {
        self.arrive[r] - self.leave[l]
    }

    /// Indexes of `from` and `to` on this route, if both appear.
    pub fn segment_of(&self, from: &Station, to: &Station) -> (Option<usize>, Option<usize>) {
        let mut l = None;
        let mut r = None;
        for (i, station) in self.stations.iter().enumerate() {
            if station == from {
                l = Some(i);
            } else if station == to {
                r = Some(i);
            }
        }
        (l, r)
    }
}

impl Record for TrainInfo {
    const SIZE: usize = 14 + MAX_STATIONS * Station::SIZE + 3 * MAX_STATIONS * 4;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.released as u8);
        buf.put_u8(self.kind);
        buf.put_i32_le(self.station_count as i32);
        buf.put_i32_le(self.seat_count);
        self.date0.encode(buf);
        self.date1.encode(buf);
        for i in 0..MAX_STATIONS {
            self.stations.get(i).copied().unwrap_or_default().encode(buf);
        }
        for array in [&self.prices, &self.arrive, &self.leave] {
            for i in 0..MAX_STATIONS {
                buf.put_i32_le(array.get(i).copied().unwrap_or(0));
            }
        }
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let released = buf.get_u8() != 0;
        let kind = buf.get_u8();
        let station_count = buf.get_i32_le() as usize;
        let seat_count = buf.get_i32_le();
        let date0 = Date::decode(buf);
        let date1 = Date::decode(buf);
        let mut stations = Vec::with_capacity(station_count);
        for i in 0..MAX_STATIONS {
            let station = Station::decode(buf);
            if i < station_count {
                stations.push(station);
            }
        }
        let mut arrays: [Vec<i32>; 3] = Default::default();
        for array in arrays.iter_mut() {
            *array = Vec::with_capacity(station_count);
            for i in 0..MAX_STATIONS {
                let v = buf.get_i32_le();
                if i < station_count {
                    array.push(v);
                }
            }
        }
        let [prices, arrive, leave] = arrays;
        Self {
            released,
            kind,
            station_count,
            seat_count,
            stations,
            prices,
            date0,
            date1,
            arrive,
            leave,
        }
    }
}

/// Remaining seats on each inter-station segment of one train run.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatInfo {
    seats: Vec<i32>,
}

impl SeatInfo {
    /// All `segments` segments start at `capacity`.
    pub fn new(capacity: i32, segments: usize) -> Self {
        Self {
            seats: vec![capacity; segments],
        }
    }

    /// Minimum over segments `[l, r)`. Callers pass `l < r`.
    pub fn min(&self, l: usize, r: usize) -> i32 {
        let mut ret = self.seats[l];
        for &s in &self.seats[l + 1..r] {
            ret = ret.min(s);
        }
        ret
    }

    /// Adds `x` to every segment in `[l, r)`.
    pub fn add(&mut self, l: usize, r: usize, x: i32) {
        for s in &mut self.seats[l..r] {
            *s += x;
        }
    }

    /// Seats remaining on segment `idx`.
    pub fn segment(&self, idx: usize) -> i32 {
        self.seats[idx]
    }
}

impl Record for SeatInfo {
    const SIZE: usize = 4 + MAX_SEGMENTS * 4;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.seats.len() as i32);
        for i in 0..MAX_SEGMENTS {
            buf.put_i32_le(self.seats.get(i).copied().unwrap_or(0));
        }
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let len = buf.get_i32_le() as usize;
        let mut seats = Vec::with_capacity(len);
        for i in 0..MAX_SEGMENTS {
            let v = buf.get_i32_le();
            if i < len {
                seats.push(v);
            }
        }
        Self { seats }
    }
}

/// One "this train stops at this station" row. The train handle gives
/// O(1) access to the schedule without a descent into the trains tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Passby {
    pub train: TrainName,
    pub handle: Handle,
    pub index: i32,
}

impl Record for Passby {
    const SIZE: usize = TrainName::SIZE + Handle::SIZE + 4;

    fn encode(&self, buf: &mut impl BufMut) {
        self.train.encode(buf);
        self.handle.encode(buf);
        buf.put_i32_le(self.index);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        Self {
            train: TrainName::decode(buf),
            handle: Handle::decode(buf),
            index: buf.get_i32_le(),
        }
    }
}

/// One line of `query_train` output.
#[derive(Debug, Clone)]
pub struct ScheduleRow {
    pub station: Station,
    /// `None` at the first station.
    pub arrive: Option<DateTime>,
    /// `None` at the last station.
    pub leave: Option<DateTime>,
    pub price: i32,
    /// `None` at the last station (no outgoing segment).
    pub seats: Option<i32>,
}

/// Full `query_train` response.
#[derive(Debug, Clone)]
pub struct TrainSchedule {
    pub train: TrainName,
    pub kind: u8,
    pub rows: Vec<ScheduleRow>,
}

impl fmt::Display for TrainSchedule {
    /// Header line, then one line per station. Missing datetimes render
    /// as `xx-xx xx:xx`, the last station's seat column as `x`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.train, self.kind as char)?;
        for row in &self.rows {
            write!(f, "\n{} ", row.station)?;
            match row.arrive {
                Some(at) => write!(f, "{}", at)?,
                None => write!(f, "xx-xx xx:xx")?,
            }
            write!(f, " -> ")?;
            match row.leave {
                Some(lt) => write!(f, "{}", lt)?,
                None => write!(f, "xx-xx xx:xx")?,
            }
            write!(f, " {} ", row.price)?;
            match row.seats {
                Some(seats) => write!(f, "{}", seats)?,
                None => write!(f, "x")?,
            }
        }
        Ok(())
    }
}

/// The three catalog tables.
pub struct TrainCatalog {
    pub(crate) trains: BPlusTree<Id, TrainInfo>,
    pub(crate) seats: BPlusTree<TrainDay, SeatInfo>,
    pub(crate) passby: BPlusTree<(Id, Id), Passby>,
}

impl TrainCatalog {
    pub fn open(config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            trains: BPlusTree::open(config, "trains")?,
            seats: BPlusTree::open(config, "seats")?,
            passby: BPlusTree::open(config, "trainsPassing")?,
        })
    }

    /// Registers a not-yet-released train.
    pub fn add_train(&self, train: &TrainName, info: TrainInfo) -> Result<()> {
        self.trains.insert(train.id(), &info)?;
        tracing::debug!(train = %train, stations = info.station_count, "train added");
        Ok(())
    }

    /// Removes a train that was never released.
    pub fn delete_train(&self, train: &TrainName) -> Result<()> {
        let tid = train.id();
        let info = self.trains.get(&tid)?;
        if info.released {
            return Err(InterlockError::AlreadyReleased);
        }
        self.trains.erase(&tid)
    }

    /// Freezes a train and fans out its seat rows (one per sale day,
    /// every segment at capacity) and passby rows (one per station).
    pub fn release_train(&self, train: &TrainName) -> Result<()> {
        let tid = train.id();
        let handle = self.trains.find(&tid)?.ok_or(InterlockError::NotFound)?;
        let mut info = self.trains.get_by_handle(handle)?;
        if info.released {
            return Err(InterlockError::AlreadyReleased);
        }
        info.released = true;
        self.trains.set_by_handle(handle, &info)?;

        let seat_row = SeatInfo::new(info.seat_count, info.station_count - 1);
        for day in 0..=info.date1.days_since(info.date0) {
            self.seats.insert((tid, day), &seat_row)?;
        }
        for (i, station) in info.stations.iter().enumerate() {
            self.passby.insert(
                (station.id(), tid),
                &Passby {
                    train: *train,
                    handle,
                    index: i as i32,
                },
            )?;
        }
        tracing::debug!(train = %train, days = info.date1.days_since(info.date0) + 1, "train released");
        Ok(())
    }

    /// Schedule and per-segment seats of the run departing station 0 on
    /// `date`. Before release the seat columns show raw capacity.
    pub fn query_train(&self, train: &TrainName, date: Date) -> Result<TrainSchedule> {
        let tid = train.id();
        let info = self.trains.get(&tid)?;
        if info.invalid_date(date) {
            return Err(InterlockError::invalid("date outside sale window"));
        }
        let seat_row = if info.released {
            Some(self.seats.get(&(tid, date.days_since(info.date0)))?)
        } else {
            None
        };
        let last = info.station_count - 1;
        let rows = (0..info.station_count)
            .map(|i| ScheduleRow {
                station: info.stations[i],
                arrive: (i != 0).then(|| DateTime::new(date, info.arrive[i])),
                leave: (i != last).then(|| DateTime::new(date, info.leave[i])),
                price: info.prices[i],
                seats: (i != last).then(|| {
                    seat_row
                        .as_ref()
                        .map_or(info.seat_count, |row| row.segment(i))
                }),
            })
            .collect();
        Ok(TrainSchedule {
            train: *train,
            kind: info.kind,
            rows,
        })
    }

    /// Truncates all three tables.
    pub fn clean(&self) -> Result<()> {
        self.trains.clear()?;
        self.seats.clear()?;
        self.passby.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interlock_common::FixedStr;
    use tempfile::tempdir;

    fn name(s: &str) -> TrainName {
        FixedStr::parse(s).unwrap()
    }

    fn sample_train() -> TrainInfo {
        TrainInfo::assemble(
            3,
            100,
            "A|B|C",
            "10|20",
            Time::parse("08:00").unwrap(),
            "120|60",
            "30|_",
            "06-01|06-03",
            b'G',
        )
        .unwrap()
    }

    #[test]
    fn test_assemble_builds_prefix_sums_and_timetable() {
        let info = sample_train();
        assert_eq!(info.prices, vec![0, 10, 30]);
        assert_eq!(info.arrive, vec![480, 600, 690]);
        assert_eq!(info.leave, vec![480, 630, 690]);
        assert_eq!(info.total_price(0, 2), 30);
        assert_eq!(info.total_time(0, 2), 210);
        assert!(!info.invalid_date(Date::new(6, 2)));
        assert!(info.invalid_date(Date::new(6, 4)));
    }

    #[test]
    fn test_assemble_rejects_bad_input() {
        assert!(TrainInfo::assemble(
            3,
            100,
            "A|B",
            "10|20",
            Time::new(480),
            "120|60",
            "30",
            "06-01|06-03",
            b'G'
        )
        .is_err());
        assert!(TrainInfo::assemble(
            1,
            100,
            "A",
            "",
            Time::new(480),
            "",
            "",
            "06-01|06-03",
            b'G'
        )
        .is_err());
    }

    #[test]
    fn test_train_info_record_roundtrip() {
        let info = sample_train();
        let mut raw = vec![0u8; TrainInfo::SIZE];
        info.encode(&mut raw.as_mut_slice());
        let back = TrainInfo::decode(&mut raw.as_slice());
        assert_eq!(info, back);
    }

    #[test]
    fn test_segment_of() {
        let info = sample_train();
        let a = FixedStr::parse("A").unwrap();
        let c = FixedStr::parse("C").unwrap();
        let x = FixedStr::parse("X").unwrap();
        assert_eq!(info.segment_of(&a, &c), (Some(0), Some(2)));
        assert_eq!(info.segment_of(&c, &a), (Some(2), Some(0)));
        assert_eq!(info.segment_of(&a, &x), (Some(0), None));
    }

    #[test]
    fn test_seat_info_interval_ops() {
        let mut seats = SeatInfo::new(100, 4);
        seats.add(1, 3, -40);
        assert_eq!(seats.min(0, 4), 60);
        assert_eq!(seats.min(0, 1), 100);
        assert_eq!(seats.min(3, 4), 100);
        seats.add(1, 3, 40);
        assert_eq!(seats.min(0, 4), 100);
    }

    #[test]
    fn test_release_creates_seat_and_passby_rows() {
        let dir = tempdir().unwrap();
        let catalog = TrainCatalog::open(&StorageConfig::at(dir.path())).unwrap();
        let train = name("T1");
        catalog.add_train(&train, sample_train()).unwrap();
        catalog.release_train(&train).unwrap();

        // Three sale days, three stations.
        let tid = train.id();
        for day in 0..3 {
            assert!(catalog.seats.contains(&(tid, day)).unwrap());
        }
        assert!(!catalog.seats.contains(&(tid, 3)).unwrap());
        for station in ["A", "B", "C"] {
            let sid = FixedStr::<30>::parse(station).unwrap().id();
            let row = catalog.passby.get(&(sid, tid)).unwrap();
            assert_eq!(row.train, train);
        }

        // Double release fails.
        assert!(matches!(
            catalog.release_train(&train),
            Err(InterlockError::AlreadyReleased)
        ));
        // A released train cannot be deleted.
        assert!(matches!(
            catalog.delete_train(&train),
            Err(InterlockError::AlreadyReleased)
        ));
    }

    #[test]
    fn test_query_train_rendering() {
        let dir = tempdir().unwrap();
        let catalog = TrainCatalog::open(&StorageConfig::at(dir.path())).unwrap();
        let train = name("T1");
        catalog.add_train(&train, sample_train()).unwrap();

        // Unreleased: capacity in every seat column.
        let schedule = catalog.query_train(&train, Date::new(6, 2)).unwrap();
        assert_eq!(
            schedule.to_string(),
            "T1 G\n\
             A xx-xx xx:xx -> 06-02 08:00 0 100\n\
             B 06-02 10:00 -> 06-02 10:30 10 100\n\
             C 06-02 11:30 -> xx-xx xx:xx 30 x"
        );

        catalog.release_train(&train).unwrap();
        let schedule = catalog.query_train(&train, Date::new(6, 2)).unwrap();
        assert!(schedule.to_string().contains("B 06-02 10:00 -> 06-02 10:30 10 100"));

        // Outside the sale window.
        assert!(catalog.query_train(&train, Date::new(6, 4)).is_err());
    }
}
