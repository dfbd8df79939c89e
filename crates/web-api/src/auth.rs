//! JWT 凭证校验
//!
//! 凭证来源按顺序尝试：`Authorization: Bearer` 头、升级 URL 上的
//! `token` 查询参数，最后手工解析原始 `Cookie:` 头。

use axum::http::{header, HeaderMap};
use domain::{Identity, Role, UserId};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: Uuid,
    #[serde(default)]
    pub role: Role,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity::new(UserId::from(self.id), self.role)
    }
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// 签发 token，仅供测试和运维工具使用
    pub fn generate_token(
        &self,
        identity: Identity,
        ttl: chrono::Duration,
    ) -> Result<String, ApiError> {
        let claims = Claims {
            id: identity.id.into(),
            role: identity.role,
            exp: (chrono::Utc::now() + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("token generation failed: {err}")))
    }

    /// 验证并解析 JWT token；失败原因只记日志，不返回给对端
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|token_data| token_data.claims)
            .map_err(|err| {
                tracing::debug!(error = %err, "凭证校验失败");
                ApiError::unauthorized()
            })
    }

    /// 从握手请求中提取并校验凭证
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
        cookie_name: &str,
    ) -> Result<Identity, ApiError> {
        let token = extract_credential(headers, query_token, cookie_name).ok_or_else(|| {
            tracing::debug!("握手请求缺少凭证");
            ApiError::unauthorized()
        })?;
        Ok(self.verify_token(token)?.identity())
    }
}

/// 按优先级提取原始凭证字符串
pub fn extract_credential<'a>(
    headers: &'a HeaderMap,
    query_token: Option<&'a str>,
    cookie_name: &str,
) -> Option<&'a str> {
    bearer_token(headers)
        .or_else(|| query_token.filter(|token| !token.is_empty()))
        .or_else(|| cookie_token(headers, cookie_name))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn cookie_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|line| line.split(';'))
        .map(str::trim)
        .find_map(|pair| {
            pair.strip_prefix(cookie_name)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    const SECRET: &str = "an-unguessable-test-secret-of-32-bytes";

    fn identity() -> Identity {
        Identity::new(UserId::generate(), Role::Moderator)
    }

    #[test]
    fn issued_token_verifies_back_to_the_same_identity() {
        let service = JwtService::new(SECRET);
        let identity = identity();
        let token = service
            .generate_token(identity, chrono::Duration::hours(1))
            .unwrap();

        let claims = service.verify_token(&token).unwrap();
        assert_eq!(claims.identity(), identity);
    }

    #[test]
    fn expired_or_foreign_tokens_are_unauthorized() {
        let service = JwtService::new(SECRET);
        let expired = service
            .generate_token(identity(), chrono::Duration::hours(-2))
            .unwrap();
        let err = service.verify_token(&expired).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let other = JwtService::new("another-secret-that-is-long-enough!!");
        let foreign = other
            .generate_token(identity(), chrono::Duration::hours(1))
            .unwrap();
        assert!(service.verify_token(&foreign).is_err());
        assert!(service.verify_token("not-a-jwt").is_err());
    }

    #[test]
    fn bearer_header_takes_precedence_over_query_and_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(header::COOKIE, HeaderValue::from_static("token=from-cookie"));

        assert_eq!(
            extract_credential(&headers, Some("from-query"), "token"),
            Some("from-header")
        );

        headers.remove(header::AUTHORIZATION);
        assert_eq!(
            extract_credential(&headers, Some("from-query"), "token"),
            Some("from-query")
        );
        assert_eq!(extract_credential(&headers, None, "token"), Some("from-cookie"));
    }

    #[test]
    fn cookie_fallback_matches_the_exact_key() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; tokenish=nope;  token=abc.def.ghi ; lang=en"),
        );
        assert_eq!(extract_credential(&headers, None, "token"), Some("abc.def.ghi"));
        assert_eq!(extract_credential(&headers, None, "session"), None);

        let mut empty = HeaderMap::new();
        empty.insert(header::COOKIE, HeaderValue::from_static("token="));
        assert_eq!(extract_credential(&empty, None, "token"), None);
    }

    #[test]
    fn missing_credential_is_rejected() {
        let service = JwtService::new(SECRET);
        let err = service
            .authenticate(&HeaderMap::new(), None, "token")
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
