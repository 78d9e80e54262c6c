//! Renders the delivery report as plain text and HTML.

use super::Report;
use crate::intake::Order;

/// Subject of every report.
pub const SUBJECT: &str = "Reporte de órdenes descargadas";

/// Heading of the delivered orders.
const UPLOADED: &str = "Órdenes subidas correctamente:";

/// Heading of the orders without documents.
const MISSING: &str = "No se encontraron archivos para las siguientes OC:";

/// Renders the plain-text body.
pub fn plain(report: &Report<'_>) -> String {
    let mut body = String::new();
    if let Some(category) = report.category {
        body.push_str(&format!("Categoría: {category}\n\n"));
    }
    body.push_str(UPLOADED);
    body.push('\n');
    for numero in report.succeeded {
        body.push_str(&format!("- {numero}\n"));
    }
    if !report.missing.is_empty() {
        body.push_str(&format!("\n{MISSING}\n"));
        body.extend(report.missing.iter().map(|numero| format!("- {numero}\n")));
    }
    if !report.orders.is_empty() {
        body.push_str("\nDetalle:\n");
        body.extend(report.orders.iter().map(detail_line));
    }
    body
}

/// Renders the HTML body.
pub fn html(report: &Report<'_>) -> String {
    let mut body = String::from("<html><body>");
    if let Some(category) = report.category {
        body.push_str(&format!("<p><b>Categoría:</b> {}</p>", escape(category)));
    }
    body.push_str(&list(UPLOADED, report.succeeded));
    if !report.missing.is_empty() {
        body.push_str(&list(MISSING, report.missing));
    }
    if !report.orders.is_empty() {
        body.push_str(
            "<table border=\"1\" cellpadding=\"4\" cellspacing=\"0\"><tr>\
             <th>OC</th><th>Proveedor</th><th>Fecha autorización</th>\
             <th>Fecha orden</th><th>Tarea</th></tr>",
        );
        body.extend(report.orders.iter().map(row));
        body.push_str("</table>");
    }
    body.push_str("</body></html>");
    body
}

/// One line of the plain-text detail.
fn detail_line(order: &Order) -> String {
    format!(
        "OC {} | Proveedor: {} | Autorización: {} | Orden: {} | Tarea: {}\n",
        order.numero,
        or_dash(order.proveedor.as_deref()),
        or_dash(order.fecha_aut.as_deref()),
        or_dash(order.fecha_orden.as_deref()),
        or_dash(order.tarea.as_deref()),
    )
}

/// Renders a titled bullet list.
fn list(title: &str, items: &[String]) -> String {
    let entries = items
        .iter()
        .map(|item| format!("<li>{}</li>", escape(item)))
        .collect::<String>();
    format!("<p>{}</p><ul>{entries}</ul>", escape(title))
}

/// Renders one table row.
fn row(order: &Order) -> String {
    let cells = [
        Some(order.numero.as_str()),
        order.proveedor.as_deref(),
        order.fecha_aut.as_deref(),
        order.fecha_orden.as_deref(),
        order.tarea.as_deref(),
    ]
    .into_iter()
    .map(|cell| format!("<td>{}</td>", escape(or_dash(cell))))
    .collect::<String>();
    format!("<tr>{cells}</tr>")
}

/// Placeholder for missing fields.
fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

/// Escapes text for HTML content.
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod test {
    use super::{html, plain};
    use crate::fetch::MessageToken;
    use crate::intake::Order;
    use crate::report::Report;

    fn order(numero: &str, proveedor: Option<&str>) -> Order {
        Order {
            fecha_aut: Some("05/06/2024".to_owned()),
            fecha_orden: None,
            numero: numero.to_owned(),
            proveedor: proveedor.map(str::to_owned),
            tarea: None,
            token: MessageToken::new(format!("T{numero}")),
        }
    }

    #[test]
    fn plain_lists_both_groups() {
        let succeeded = ["1".to_owned(), "2".to_owned()];
        let missing = ["3".to_owned()];
        let report = Report {
            category: None,
            missing: &missing,
            orders: &[],
            succeeded: &succeeded,
        };

        assert_eq!(
            plain(&report),
            "Órdenes subidas correctamente:\n- 1\n- 2\n\n\
             No se encontraron archivos para las siguientes OC:\n- 3\n"
        );
    }

    #[test]
    fn plain_omits_empty_missing_group() {
        let succeeded = ["7".to_owned()];
        let report = Report {
            category: None,
            missing: &[],
            orders: &[],
            succeeded: &succeeded,
        };
        assert_eq!(plain(&report), "Órdenes subidas correctamente:\n- 7\n");
        assert_eq!(
            html(&report),
            "<html><body><p>Órdenes subidas correctamente:</p><ul><li>7</li></ul></body></html>"
        );
    }

    #[test]
    fn category_and_details_appear_in_both_bodies() {
        let succeeded = ["1".to_owned()];
        let orders = [order("1", Some("ACME & Hijos"))];
        let report = Report {
            category: Some("abastecimiento"),
            missing: &[],
            orders: &orders,
            succeeded: &succeeded,
        };

        let text = plain(&report);
        assert!(text.starts_with("Categoría: abastecimiento\n"), "{text}");
        assert!(
            text.ends_with(
                "\nDetalle:\nOC 1 | Proveedor: ACME & Hijos | Autorización: 05/06/2024 \
                 | Orden: - | Tarea: -\n"
            ),
            "{text}"
        );

        let rich = html(&report);
        assert!(rich.contains("<b>Categoría:</b> abastecimiento"), "{rich}");
        assert!(
            rich.contains(
                "<tr><td>1</td><td>ACME &amp; Hijos</td>\
                 <td>05/06/2024</td><td>-</td><td>-</td></tr>"
            ),
            "{rich}"
        );
        assert!(rich.ends_with("</tr></table></body></html>"), "{rich}");
    }
}
