// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stable orderings for envelopes and payloads.
//!
//! Streams and recent-log batches arrive in delivery order, which is not
//! chronological. These helpers reorder them; entries with equal keys keep
//! their relative order.

use dropsonde_events::{ContainerMetric, Envelope, LogMessage};

/// Orders envelopes by timestamp (missing timestamps sort as zero).
pub fn sort_by_timestamp(envelopes: &mut [Envelope]) {
    envelopes.sort_by_key(Envelope::timestamp_nanos);
}

/// Orders log messages by their own timestamp.
pub fn sort_recent(messages: &mut [LogMessage]) {
    messages.sort_by_key(|message| message.timestamp);
}

/// Orders container metrics by instance index.
pub fn sort_container_metrics(metrics: &mut [ContainerMetric]) {
    metrics.sort_by_key(|metric| metric.instance_index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropsonde_events::EventType;
    use proptest::prelude::*;

    fn envelope(timestamp: i64, origin: usize) -> Envelope {
        Envelope {
            origin: origin.to_string(),
            event_type: EventType::LogMessage as i32,
            timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    #[test]
    fn sort_by_timestamp_orders_and_keeps_ties() {
        let mut envelopes = vec![envelope(3, 0), envelope(1, 1), envelope(3, 2), envelope(2, 3)];
        sort_by_timestamp(&mut envelopes);
        let origins: Vec<&str> = envelopes.iter().map(|e| e.origin.as_str()).collect();
        assert_eq!(origins, ["1", "3", "0", "2"]);
    }

    #[test]
    fn sort_by_timestamp_treats_missing_timestamp_as_zero() {
        let mut envelopes = vec![envelope(5, 0), Envelope { timestamp: None, ..envelope(0, 1) }];
        sort_by_timestamp(&mut envelopes);
        assert_eq!(envelopes[0].origin, "1");
    }

    #[test]
    fn sort_recent_orders_log_messages() {
        let mut messages: Vec<LogMessage> = [30, 10, 20]
            .into_iter()
            .map(|timestamp| LogMessage {
                timestamp,
                message: timestamp.to_string().into_bytes(),
                ..Default::default()
            })
            .collect();
        sort_recent(&mut messages);
        let stamps: Vec<i64> = messages.iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, [10, 20, 30]);
    }

    #[test]
    fn sort_container_metrics_orders_by_instance() {
        let mut metrics: Vec<ContainerMetric> = [2, 0, 1]
            .into_iter()
            .map(|instance_index| ContainerMetric {
                application_id: "app".to_string(),
                instance_index,
                ..Default::default()
            })
            .collect();
        sort_container_metrics(&mut metrics);
        let order: Vec<i32> = metrics.iter().map(|m| m.instance_index).collect();
        assert_eq!(order, [0, 1, 2]);
    }

    proptest! {
        /// Sorting is idempotent and equal timestamps keep their input order.
        #[test]
        fn sort_by_timestamp_is_stable(stamps in proptest::collection::vec(0i64..5, 0..64)) {
            let mut envelopes: Vec<Envelope> = stamps
                .iter()
                .enumerate()
                .map(|(position, stamp)| envelope(*stamp, position))
                .collect();
            sort_by_timestamp(&mut envelopes);

            for pair in envelopes.windows(2) {
                prop_assert!(pair[0].timestamp_nanos() <= pair[1].timestamp_nanos());
                if pair[0].timestamp_nanos() == pair[1].timestamp_nanos() {
                    let first: usize = pair[0].origin.parse().unwrap();
                    let second: usize = pair[1].origin.parse().unwrap();
                    prop_assert!(first < second);
                }
            }

            let once = envelopes.clone();
            sort_by_timestamp(&mut envelopes);
            prop_assert_eq!(once, envelopes);
        }
    }
}
