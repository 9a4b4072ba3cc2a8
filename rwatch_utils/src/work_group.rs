use crossbeam_channel::{Receiver, Sender};
use tokio::sync::mpsc;

/// Default bound for work-group input and output channels.
pub const WORK_GROUP_BUFFER: usize = 64;

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Start a group of worker threads that process inputs from a shared bounded
/// channel. For each input, `handler` is invoked and may emit any number of
/// outputs through the provided sender. Workers run until the input channel
/// closes; the output channel closes once the last worker exits and drops
/// its sender clone.
///
/// One worker thread is spawned per available CPU. Used to spread the cost
/// of parsing large message backlogs across cores while an async consumer
/// drains the output side.
pub fn spawn_work_group_with<I, O, F>(
    input: Receiver<I>,
    handler: F,
) -> mpsc::Receiver<O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I, &mpsc::Sender<O>) + Send + Sync + Clone + 'static,
{
    let (output_tx, output_rx) = mpsc::channel(WORK_GROUP_BUFFER);

    for _ in 0..worker_count() {
        let input = input.clone();
        let output = output_tx.clone();
        let handler = handler.clone();

        std::thread::spawn(move || {
            while let Ok(value) = input.recv() {
                handler(value, &output);
            }
        });
    }

    output_rx
}

/// Convenience wrapper around [`spawn_work_group_with`] that also creates
/// the bounded input channel.
pub fn spawn_work_group<I, O, F>(handler: F) -> (Sender<I>, mpsc::Receiver<O>)
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I, &mpsc::Sender<O>) + Send + Sync + Clone + 'static,
{
    let (input_tx, input_rx) = crossbeam_channel::bounded(WORK_GROUP_BUFFER);
    (input_tx, spawn_work_group_with(input_rx, handler))
}

#[cfg(test)]
mod tests {
    use super::spawn_work_group;

    #[tokio::test]
    async fn processes_all_inputs_and_closes_output() {
        let (input, mut output) = spawn_work_group(|value: u64, out| {
            if value % 2 == 0 {
                let _ = out.blocking_send(value * 10);
            }
        });

        for value in 0..100u64 {
            input.send(value).expect("workers should be running");
        }
        drop(input);

        let mut received = Vec::new();
        while let Some(value) = output.recv().await {
            received.push(value);
        }

        received.sort_unstable();
        let expected: Vec<u64> = (0..100).filter(|v| v % 2 == 0).map(|v| v * 10).collect();
        assert_eq!(received, expected);
    }
}
