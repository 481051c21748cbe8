//! Observability for the chat client.
//!
//! Tracing is configured by the binary; this module holds the metric
//! definitions. Labels never carry room ids, member ids or token material.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `chat_api_requests_total` | Counter | `method`, `endpoint`, `status_code` |
//! | `chat_api_request_duration_seconds` | Histogram | `method`, `endpoint`, `status` |
//! | `chat_token_refresh_total` | Counter | `status` |
//! | `chat_socket_connects_total` | Counter | `outcome` |
//! | `chat_socket_connected` | Gauge | none |
//! | `chat_socket_frames_dropped_total` | Counter | `reason` |
//! | `chat_room_joins_total` | Counter | `outcome` |
//! | `chat_rooms_joined` | Gauge | none |
//! | `chat_messages_delivered_total` | Counter | `delivery` |

pub mod metrics;
