//! Replaying handled channels to observers that ask for recovery.

use tracing::{debug, info};

use super::{DISPATCH_TARGET, Dispatcher};
use crate::bus::{Bus, CallOutcome, ObserveRequest};
use crate::calls::CallPurpose;
use crate::filter::match_filters;
use crate::names::{ChannelPath, ClientName};

impl<B: Bus> Dispatcher<B> {
    /// Shows every matching handled channel to an observer that declared
    /// `recover` and appeared after startup.
    pub(super) fn recover_observer(&mut self, client: &ClientName) {
        let Some(filters) = self
            .registry
            .lookup(client)
            .and_then(|record| record.roles().observer())
            .filter(|observer| observer.recover)
            .map(|observer| observer.filters.clone())
        else {
            return;
        };

        let requests: Vec<ObserveRequest> = self
            .handler_map
            .iter()
            .filter(|(_, entry)| match_filters(entry.channel().properties(), &filters, false) > 0)
            .map(|(path, entry)| ObserveRequest {
                account: entry.account().clone(),
                channel: path.clone(),
                properties: entry.channel().properties().clone(),
                operation: None,
                satisfied_requests: entry.channel().satisfied_requests(),
                recovering: true,
            })
            .collect();
        if requests.is_empty() {
            return;
        }

        info!(
            target: DISPATCH_TARGET,
            observer = %client,
            channels = requests.len(),
            "recovering observer"
        );
        for request in requests {
            let call = self.calls.issue(
                Some(client),
                CallPurpose::Recover {
                    channel: request.channel.clone(),
                },
            );
            self.bus.observe_channels(call, client, request);
        }
    }

    pub(super) fn on_recovery_done(
        channel: &ChannelPath,
        observer: Option<&ClientName>,
        outcome: &CallOutcome,
    ) {
        if let Err(error) = outcome {
            debug!(
                target: DISPATCH_TARGET,
                channel = %channel,
                observer = ?observer,
                error = %error,
                "observer failed to recover channel"
            );
        }
    }
}
