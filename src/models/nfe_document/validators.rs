use once_cell::sync::OnceCell;

use crate::{
    error::ServiceError,
    models::nfe_document::NewNfeDocument,
    services::functional_patterns::{validation_rules, Validator},
};

pub fn new_nfe_validator() -> Validator<NewNfeDocument> {
    Validator::new()
        .rule(|dto: &NewNfeDocument| validation_rules::required("tenant_id")(&dto.tenant_id))
        .rule(|dto: &NewNfeDocument| validation_rules::max_length("tenant_id", 64)(&dto.tenant_id))
        .rule(|dto: &NewNfeDocument| validation_rules::chave_acesso("chave_acesso")(&dto.chave_acesso))
        .rule(|dto: &NewNfeDocument| validation_rules::max_length("numero", 20)(&dto.numero))
        .rule(|dto: &NewNfeDocument| validation_rules::max_length("serie", 10)(&dto.serie))
        .rule(|dto: &NewNfeDocument| {
            if dto.valor_total < rust_decimal::Decimal::ZERO {
                Err(ServiceError::bad_request("valor_total must not be negative"))
            } else {
                Ok(())
            }
        })
}

pub fn validate_new_nfe(dto: &NewNfeDocument) -> Result<(), ServiceError> {
    static NEW_NFE_VALIDATOR: OnceCell<Validator<NewNfeDocument>> = OnceCell::new();
    NEW_NFE_VALIDATOR.get_or_init(new_nfe_validator).validate(dto)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn dto_valido() -> NewNfeDocument {
        NewNfeDocument {
            tenant_id: "t1".into(),
            chave_acesso: "3".repeat(44),
            numero: "123".into(),
            serie: "1".into(),
            data_emissao: Utc::now(),
            emit_cnpj: "12345678000190".into(),
            emit_nome: "Fornecedor".into(),
            dest_cnpj: "98765432000109".into(),
            dest_nome: "Cliente".into(),
            valor_total: Decimal::new(10000, 2),
            valor_produtos: Decimal::new(10000, 2),
            status_nfe: "autorizada".into(),
            protocolo: String::new(),
            xml_content: String::new(),
            data_importacao: Utc::now(),
        }
    }

    #[test]
    fn aceita_dto_valido() {
        assert!(validate_new_nfe(&dto_valido()).is_ok());
    }

    #[test]
    fn rejeita_chave_curta() {
        let mut dto = dto_valido();
        dto.chave_acesso = "123".into();
        assert!(validate_new_nfe(&dto).is_err());
    }

    #[test]
    fn rejeita_valor_negativo() {
        let mut dto = dto_valido();
        dto.valor_total = Decimal::new(-1, 0);
        assert!(validate_new_nfe(&dto).is_err());
    }
}
