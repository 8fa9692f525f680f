//! CPU and memory sampling of an external process tree.
//!
//! A background thread polls the root process and all of its descendants at
//! a fixed interval until it is told to stop or the root is gone. Failures
//! while sampling only cost that one sample; they are logged and never
//! reported to the caller.

use bluebase_protocol::ResourceUsageSummary;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    fs, io,
    sync::mpsc::{self, RecvTimeoutError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// One reading of a single process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessReading {
    pub rss_bytes: u64,
    /// User plus system CPU time in clock ticks.
    pub cpu_ticks: u64,
    /// Start time in clock ticks since boot.
    pub start_ticks: u64,
}

/// Usage of a whole process tree at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub memory_bytes: u64,
    pub cpu_percent: f64,
}

/// Source of per-process readings.
pub trait ProcessInspector {
    /// False once the process has exited, including while it is a zombie.
    fn is_alive(&self, pid: u32) -> bool;

    fn read(&self, pid: u32) -> io::Result<ProcessReading>;

    /// Direct children of `pid`.
    fn children(&self, pid: u32) -> io::Result<Vec<u32>>;

    fn uptime_ticks(&self) -> io::Result<u64>;

    fn ticks_per_second(&self) -> u64;

    /// Every live process below `root`, breadth first.
    fn descendants(&self, root: u32) -> io::Result<Vec<u32>> {
        let mut found = Vec::new();
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(pid) = queue.pop_front() {
            for child in self.children(pid)? {
                if seen.insert(child) {
                    found.push(child);
                    queue.push_back(child);
                }
            }
        }
        Ok(found)
    }
}

/// Reads the Linux `/proc` filesystem.
#[derive(Debug, Clone)]
pub struct ProcFsInspector {
    page_size: u64,
    ticks_per_second: u64,
}

impl Default for ProcFsInspector {
    fn default() -> Self {
        Self {
            page_size: sysconf_or(SysconfName::PageSize, 4096),
            ticks_per_second: sysconf_or(SysconfName::ClockTicks, 100),
        }
    }
}

enum SysconfName {
    PageSize,
    ClockTicks,
}

#[cfg(unix)]
fn sysconf_or(name: SysconfName, fallback: u64) -> u64 {
    let name = match name {
        SysconfName::PageSize => libc::_SC_PAGESIZE,
        SysconfName::ClockTicks => libc::_SC_CLK_TCK,
    };
    let value = unsafe { libc::sysconf(name) };
    if value > 0 { value as u64 } else { fallback }
}

#[cfg(not(unix))]
fn sysconf_or(_name: SysconfName, fallback: u64) -> u64 {
    fallback
}

/// Fields of `/proc/<pid>/stat` that follow the parenthesised command name.
struct StatFields {
    state: char,
    ppid: u32,
    utime: u64,
    stime: u64,
    starttime: u64,
    rss_pages: u64,
}

fn invalid(pid: u32, what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed /proc/{pid}/stat: {what}"),
    )
}

fn parse_stat(pid: u32, text: &str) -> io::Result<StatFields> {
    // the command name may itself contain spaces and parentheses
    let rest = text
        .rfind(')')
        .map(|i| &text[i + 1..])
        .ok_or_else(|| invalid(pid, "no command name"))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let number = |idx: usize, what: &str| -> io::Result<u64> {
        fields
            .get(idx)
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or_else(|| invalid(pid, what))
    };
    Ok(StatFields {
        state: fields
            .first()
            .and_then(|s| s.chars().next())
            .ok_or_else(|| invalid(pid, "state"))?,
        ppid: number(1, "ppid")? as u32,
        utime: number(11, "utime")?,
        stime: number(12, "stime")?,
        starttime: number(19, "starttime")?,
        rss_pages: number(21, "rss")?,
    })
}

impl ProcFsInspector {
    fn stat(&self, pid: u32) -> io::Result<StatFields> {
        parse_stat(pid, &fs::read_to_string(format!("/proc/{pid}/stat"))?)
    }
}

impl ProcessInspector for ProcFsInspector {
    fn is_alive(&self, pid: u32) -> bool {
        matches!(self.stat(pid), Ok(stat) if !matches!(stat.state, 'Z' | 'X' | 'x'))
    }

    fn read(&self, pid: u32) -> io::Result<ProcessReading> {
        let stat = self.stat(pid)?;
        Ok(ProcessReading {
            rss_bytes: stat.rss_pages * self.page_size,
            cpu_ticks: stat.utime + stat.stime,
            start_ticks: stat.starttime,
        })
    }

    fn children(&self, pid: u32) -> io::Result<Vec<u32>> {
        Ok(self
            .parent_map()?
            .remove(&pid)
            .unwrap_or_default())
    }

    fn uptime_ticks(&self) -> io::Result<u64> {
        let text = fs::read_to_string("/proc/uptime")?;
        let seconds = text
            .split_whitespace()
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed /proc/uptime"))?;
        Ok((seconds * self.ticks_per_second as f64) as u64)
    }

    fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }

    /// One pass over the process table instead of one per tree level.
    fn descendants(&self, root: u32) -> io::Result<Vec<u32>> {
        let mut by_parent = self.parent_map()?;
        let mut found = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(pid) = queue.pop_front() {
            for child in by_parent.remove(&pid).unwrap_or_default() {
                found.push(child);
                queue.push_back(child);
            }
        }
        Ok(found)
    }
}

impl ProcFsInspector {
    /// parent pid -> child pids, over every process readable right now.
    fn parent_map(&self) -> io::Result<HashMap<u32, Vec<u32>>> {
        let mut map: HashMap<u32, Vec<u32>> = HashMap::new();
        for entry in fs::read_dir("/proc")? {
            let Ok(entry) = entry else {
                continue;
            };
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            // processes exit while we walk the table
            if let Ok(stat) = self.stat(pid) {
                map.entry(stat.ppid).or_default().push(pid);
            }
        }
        Ok(map)
    }
}

/// Turns cumulative CPU ticks into utilisation percentages.
#[derive(Debug, Default)]
pub struct CpuTracker {
    previous: HashMap<u32, (u64, Instant)>,
}

impl CpuTracker {
    /// Percent of one core used by `pid` since it was last seen. On first
    /// sight this is the average over the process lifetime.
    pub fn cpu_percent(
        &mut self,
        pid: u32,
        reading: &ProcessReading,
        now: Instant,
        uptime_ticks: Option<u64>,
        ticks_per_second: u64,
    ) -> f64 {
        let tps = ticks_per_second.max(1) as f64;
        let percent = match self.previous.get(&pid) {
            Some((ticks, at)) => {
                let wall = now.saturating_duration_since(*at).as_secs_f64();
                if wall > 0.0 {
                    reading.cpu_ticks.saturating_sub(*ticks) as f64 / tps / wall * 100.0
                } else {
                    0.0
                }
            }
            None => match uptime_ticks {
                Some(uptime) if uptime > reading.start_ticks => {
                    reading.cpu_ticks as f64 / (uptime - reading.start_ticks) as f64 * 100.0
                }
                _ => 0.0,
            },
        };
        self.previous.insert(pid, (reading.cpu_ticks, now));
        percent
    }

    /// Reads the whole tree under `root` once. Descendants that vanish
    /// mid-read are skipped; failing to read the root fails the sample.
    pub fn sample<I: ProcessInspector>(
        &mut self,
        inspector: &I,
        root: u32,
    ) -> io::Result<ResourceSample> {
        let mut pids = vec![root];
        pids.extend(inspector.descendants(root)?);
        let uptime = inspector.uptime_ticks().ok();
        let tps = inspector.ticks_per_second();
        let now = Instant::now();

        let mut sample = ResourceSample {
            memory_bytes: 0,
            cpu_percent: 0.0,
        };
        for pid in pids {
            let reading = match inspector.read(pid) {
                Ok(r) => r,
                Err(e) if pid == root => return Err(e),
                Err(_) => continue,
            };
            sample.memory_bytes += reading.rss_bytes;
            sample.cpu_percent += self.cpu_percent(pid, &reading, now, uptime, tps);
        }
        Ok(sample)
    }
}

pub fn summarize(samples: &[ResourceSample], elapsed: Duration) -> ResourceUsageSummary {
    let mut summary = ResourceUsageSummary {
        elapsed_seconds: elapsed.as_secs_f64(),
        sample_count: samples.len(),
        ..Default::default()
    };
    if samples.is_empty() {
        return summary;
    }
    let n = samples.len() as f64;
    summary.max_memory = samples.iter().map(|s| s.memory_bytes).max().unwrap_or(0);
    summary.avg_memory =
        (samples.iter().map(|s| s.memory_bytes as f64).sum::<f64>() / n).round() as u64;
    summary.max_cpu = samples.iter().map(|s| s.cpu_percent).fold(0.0, f64::max);
    summary.avg_cpu = samples.iter().map(|s| s.cpu_percent).sum::<f64>() / n;
    summary
}

fn sampling_loop<I: ProcessInspector>(
    inspector: I,
    root: u32,
    interval: Duration,
    stop: mpsc::Receiver<()>,
) -> Vec<ResourceSample> {
    let mut tracker = CpuTracker::default();
    let mut samples = Vec::new();
    loop {
        if !inspector.is_alive(root) {
            break;
        }
        match tracker.sample(&inspector, root) {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                if !inspector.is_alive(root) {
                    break;
                }
                log::debug!("Skipping resource sample of pid {root}: {e}");
            }
        }
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    samples
}

/// Handle on a running sampler thread.
///
/// The sampler is stopped and joined exactly once, by [`Self::finish`] or,
/// if that is never reached, when the handle is dropped.
pub struct ResourceMonitor {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<Vec<ResourceSample>>>,
    started: Instant,
}

impl ResourceMonitor {
    pub fn start<I>(inspector: I, root: u32, interval: Duration) -> Self
    where
        I: ProcessInspector + Send + 'static,
    {
        let (stop, stop_rx) = mpsc::channel();
        let started = Instant::now();
        let handle = thread::Builder::new()
            .name(format!("sampler-{root}"))
            .spawn(move || sampling_loop(inspector, root, interval, stop_rx));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("Could not start resource sampler for pid {root}: {e}");
                None
            }
        };
        Self {
            stop: Some(stop),
            handle,
            started,
        }
    }

    /// Stops sampling and summarises what was collected.
    pub fn finish(mut self) -> ResourceUsageSummary {
        self.stop_and_collect()
    }

    fn stop_and_collect(&mut self) -> ResourceUsageSummary {
        if let Some(stop) = self.stop.take() {
            // the sampler may already have exited on its own
            let _ = stop.send(());
        }
        let samples = match self.handle.take().map(JoinHandle::join) {
            Some(Ok(samples)) => samples,
            Some(Err(_)) => {
                log::warn!("Resource sampler panicked; reporting no samples");
                Vec::new()
            }
            None => Vec::new(),
        };
        summarize(&samples, self.started.elapsed())
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if self.handle.is_some() || self.stop.is_some() {
            self.stop_and_collect();
        }
    }
}
