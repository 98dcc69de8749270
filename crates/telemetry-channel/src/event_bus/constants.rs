// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Capacity of the event bus channel.
///
/// The coordination task never waits for room: events published while the bus
/// holds this many unread events are dropped.
pub(crate) const MAX_EVENTS: usize = 100;
