mod cache_service_test;
mod cached_stream_test;
