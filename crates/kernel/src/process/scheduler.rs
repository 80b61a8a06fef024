/// Per-CPU round-robin preemptive scheduler
///
/// Each online CPU owns a runqueue in its percpu area and schedules
/// independently; timeslice expiry and blocking/waking only ever touch
/// the local CPU's queue directly, cross-CPU wakeups go through
/// `enqueue_on` plus periodic load balancing so the target CPU picks the
/// migrated task up on its own next reschedule.

use super::{Pid, ProcessState};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Timeslice in timer ticks (100Hz timer => 10ms/tick)
const TIMESLICE_TICKS: u32 = 10;

static TIMESLICE_REMAINING: [AtomicU32; crate::smp::MAX_CPUS] =
    [const { AtomicU32::new(TIMESLICE_TICKS) }; crate::smp::MAX_CPUS];

static NEED_RESCHED: [AtomicBool; crate::smp::MAX_CPUS] =
    [const { AtomicBool::new(false) }; crate::smp::MAX_CPUS];

/// Initialize scheduler state for all CPUs. Called once during boot.
pub fn init() {
    for i in 0..crate::smp::MAX_CPUS {
        TIMESLICE_REMAINING[i].store(TIMESLICE_TICKS, Ordering::Release);
        NEED_RESCHED[i].store(false, Ordering::Release);
    }
    crate::info!("scheduler: initialized, timeslice={} ticks", TIMESLICE_TICKS);
}

/// Currently running task on this CPU, if any.
pub fn current_pid() -> Option<Pid> {
    let cpu_id = crate::arch::current_cpu_id();
    let pid = crate::smp::percpu::get(cpu_id).current_pid();
    if pid == 0 { None } else { Some(pid) }
}

/// Record `pid` as the task now running on this CPU.
pub fn set_current(pid: Pid) {
    let cpu_id = crate::arch::current_cpu_id();
    crate::smp::percpu::get(cpu_id).set_current_pid(pid);
    TIMESLICE_REMAINING[cpu_id].store(TIMESLICE_TICKS, Ordering::Release);
    crate::smp::percpu::get(cpu_id).set_idle(false);
}

/// Add a task to this CPU's ready queue.
pub fn enqueue(pid: Pid) {
    crate::smp::percpu::enqueue_current(pid);
    crate::debug!("scheduler: enqueued pid {} on cpu {}", pid, crate::arch::current_cpu_id());
}

/// Add a task to a specific CPU's ready queue (used for cross-CPU wakeup
/// and load balancing).
pub fn enqueue_on(cpu_id: usize, pid: Pid) {
    crate::smp::percpu::enqueue_on(cpu_id, pid);
    crate::debug!("scheduler: enqueued pid {} on cpu {}", pid, cpu_id);
}

/// Remove a task from this CPU's ready queue, if present.
pub fn dequeue(pid: Pid) {
    let cpu_id = crate::arch::current_cpu_id();
    let percpu = crate::smp::percpu::get(cpu_id);
    unsafe {
        let runqueue = &mut *percpu.runqueue.get();
        runqueue.retain(|&p| p != pid);
    }
    percpu.update_load();
}

/// Timer tick handler, called from the arch IRQ path on every CPU.
pub fn timer_tick() {
    let cpu_id = crate::arch::current_cpu_id();
    crate::smp::percpu::get(cpu_id).inc_timer_ticks();

    let remaining = TIMESLICE_REMAINING[cpu_id].load(Ordering::Acquire);
    if remaining > 0 {
        TIMESLICE_REMAINING[cpu_id].store(remaining - 1, Ordering::Release);
    }
    if remaining <= 1 {
        NEED_RESCHED[cpu_id].store(true, Ordering::Release);
    }

    if crate::smp::percpu::get(cpu_id).timer_ticks.load(Ordering::Relaxed) % 10 == 0 {
        balance_load();
    }
}

/// Whether this CPU should call [`schedule`] at the next safe point.
pub fn need_resched() -> bool {
    let cpu_id = crate::arch::current_cpu_id();
    NEED_RESCHED[cpu_id].load(Ordering::Acquire)
}

fn clear_need_resched() {
    let cpu_id = crate::arch::current_cpu_id();
    NEED_RESCHED[cpu_id].store(false, Ordering::Release);
}

fn pick_next() -> Option<Pid> {
    crate::smp::percpu::dequeue_current()
}

/// Pick the next ready task and context-switch into it. Must be called
/// with interrupts disabled; leaves the caller's CPU running whichever
/// task was selected (possibly the same one).
pub fn schedule() {
    let cpu_id = crate::arch::current_cpu_id();
    clear_need_resched();

    let current = current_pid();
    let next_pid = match pick_next() {
        Some(pid) => pid,
        None => {
            crate::smp::percpu::get(cpu_id).set_idle(true);
            return;
        }
    };

    // Round-robin: the task we just picked goes back on the tail unless
    // something else (block_current, do_exit) already removed it.
    enqueue(next_pid);

    if current == Some(next_pid) {
        TIMESLICE_REMAINING[cpu_id].store(TIMESLICE_TICKS, Ordering::Release);
        return;
    }

    crate::smp::percpu::get(cpu_id).inc_context_switches();

    let mut table = super::get_process_table();
    let table = match table.as_mut() {
        Some(t) => t,
        None => {
            crate::error!("scheduler: process table not initialized");
            return;
        }
    };
    let next = match table.get_mut(next_pid) {
        Some(task) => task,
        None => {
            crate::error!("scheduler: next task {} not found", next_pid);
            return;
        }
    };

    if next.mm.page_table != 0 {
        crate::mm::switch_user_mm(next.mm.page_table);
    }
    crate::arch::restore_trap_frame(&next.trap_frame);

    set_current(next_pid);
}

/// Voluntarily give up the remainder of this CPU's timeslice.
pub fn yield_now() {
    let cpu_id = crate::arch::current_cpu_id();
    NEED_RESCHED[cpu_id].store(true, Ordering::Release);
    schedule();
}

/// Remove the current task from its runqueue, mark it sleeping and
/// switch away. The caller is responsible for having set up whatever
/// wait channel will eventually call [`wake_process`].
pub fn block_current() {
    if let Some(pid) = current_pid() {
        dequeue(pid);

        let mut table = super::get_process_table();
        if let Some(ref mut t) = *table {
            if let Some(task) = t.get_mut(pid) {
                task.state = ProcessState::Sleeping;
            }
        }

        let cpu_id = crate::arch::current_cpu_id();
        NEED_RESCHED[cpu_id].store(true, Ordering::Release);
        schedule();
    }
}

/// Mark a sleeping task runnable and place it on the least loaded CPU.
pub fn wake_process(pid: Pid) {
    let mut table = super::get_process_table();
    if let Some(ref mut t) = *table {
        if let Some(task) = t.get_mut(pid) {
            if task.state == ProcessState::Sleeping {
                task.state = ProcessState::Running;
                let target_cpu = find_least_loaded_cpu();
                enqueue_on(target_cpu, pid);
            }
        }
    }
}

fn find_least_loaded_cpu() -> usize {
    let mut min_load = usize::MAX;
    let mut min_cpu = 0;
    for cpu_id in 0..crate::smp::MAX_CPUS {
        if !crate::smp::is_cpu_online(cpu_id) {
            continue;
        }
        let load = crate::smp::percpu::get(cpu_id).load.load(Ordering::Relaxed);
        if load < min_load {
            min_load = load;
            min_cpu = cpu_id;
        }
    }
    min_cpu
}

/// Migrate one ready task away from an overloaded CPU. Invoked every 10
/// ticks from [`timer_tick`]; a CPU running more than two tasks above
/// the fleet average gives one up to whoever is least loaded.
fn balance_load() {
    let cpu_id = crate::arch::current_cpu_id();

    let mut total_load = 0;
    let mut num_online = 0;
    for i in 0..crate::smp::MAX_CPUS {
        if crate::smp::is_cpu_online(i) {
            total_load += crate::smp::percpu::get(i).load.load(Ordering::Relaxed);
            num_online += 1;
        }
    }
    if num_online <= 1 {
        return;
    }

    let avg_load = total_load / num_online;
    let my_load = crate::smp::percpu::get(cpu_id).load.load(Ordering::Relaxed);
    if my_load > avg_load + 2 {
        if let Some(pid) = pick_next() {
            let target_cpu = find_least_loaded_cpu();
            if target_cpu != cpu_id {
                crate::debug!("scheduler: migrating pid {} cpu {} -> {}", pid, cpu_id, target_cpu);
                enqueue_on(target_cpu, pid);
            } else {
                enqueue(pid);
            }
        }
    }
}

/// Snapshot of this CPU's scheduler state, exposed for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerStats {
    pub cpu_id: usize,
    pub current_pid: Option<Pid>,
    pub runqueue_len: usize,
    pub context_switches: usize,
    pub timer_ticks: usize,
    pub timeslice_remaining: u32,
}

pub fn stats() -> SchedulerStats {
    let cpu_id = crate::arch::current_cpu_id();
    let percpu = crate::smp::percpu::get(cpu_id);
    SchedulerStats {
        cpu_id,
        current_pid: current_pid(),
        runqueue_len: percpu.runqueue_len(),
        context_switches: percpu.context_switches.load(Ordering::Relaxed),
        timer_ticks: percpu.timer_ticks.load(Ordering::Relaxed),
        timeslice_remaining: TIMESLICE_REMAINING[cpu_id].load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeslice_constant_is_nonzero() {
        assert!(TIMESLICE_TICKS > 0);
    }
}
