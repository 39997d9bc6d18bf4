//! gRPC server reflection for the echo schema.
//!
//! The encoded descriptor is committed next to the generated bindings and
//! regenerated with them, so building the crate never needs `protoc`.

use tonic::transport::server::Router;

use crate::error::Result;

/// Encoded `FileDescriptorSet` for `proto/echo.proto`.
pub const FILE_DESCRIPTOR_SET: &[u8] = include_bytes!("prost/echo_descriptor.bin");

/// Adds the v1 reflection service advertising `echo.EchoService` to `router`.
pub fn register(router: Router) -> Result<Router> {
    let service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;
    Ok(router.add_service(service))
}

#[cfg(test)]
mod tests {
    use prost::Message;
    use prost_types::{field_descriptor_proto::Type, FileDescriptorSet};

    use super::*;
    use crate::proto;

    #[test]
    fn descriptor_matches_generated_service() {
        let set = FileDescriptorSet::decode(FILE_DESCRIPTOR_SET).unwrap();
        let file = &set.file[0];
        assert_eq!(file.name(), "echo.proto");
        assert_eq!(file.package(), proto::PACKAGE);

        let service = &file.service[0];
        let full_name = format!("{}.{}", file.package(), service.name());
        assert_eq!(full_name, proto::SERVICE_NAME);

        let method = &service.method[0];
        assert_eq!(method.name(), "Echo");
        assert_eq!(method.input_type(), ".echo.EchoMessage");
        assert_eq!(method.output_type(), ".echo.EchoMessage");

        let field = &file.message_type[0].field[0];
        assert_eq!(field.name(), "text");
        assert_eq!(field.number(), 1);
        assert_eq!(field.r#type(), Type::String);
    }

    #[test]
    fn reflection_service_builds() {
        let built = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1();
        assert!(built.is_ok());
    }
}
