// Infrastructure layer modules
pub mod auth_handler;
pub mod config;
pub mod config_source;
pub mod event_repository;
pub mod graphql;
pub mod keyed_store;
pub mod lambda_proxy;
pub mod logging;
pub mod meetup_repository;
pub mod memory_store;

// Re-exports
pub use auth_handler::{AuthError, AuthHandler, CachedToken, MeetupAuthHandler};
pub use config::{
    EventTablesConfig, ImporterConfig, MeetupApiConfig, MeetupAuthConfig, dynamodb_client,
    load_aws_config,
};
pub use config_source::{AwsParameterStore, ConfigError, ConfigSource, ParameterStore};
pub use event_repository::{EventRepository, EventRepositoryError, StoreEventRepository};
pub use graphql::{
    GraphQlError, GraphQlHandler, GraphQlRequest, MeetupGraphQlClient, build_http_client,
};
pub use keyed_store::{
    DynamoKeyedStore, Item, KeyQuery, KeyedStore, SortKeyCondition, StoreError, string_key,
};
pub use lambda_proxy::{AwsFunctionInvoker, FunctionInvoker, LambdaProxyGraphQlHandler};
pub use logging::init_logging;
pub use meetup_repository::{GraphQlMeetupRepository, MeetupRepository, MeetupRepositoryError};
pub use memory_store::InMemoryKeyedStore;
